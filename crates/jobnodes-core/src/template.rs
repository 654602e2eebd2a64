//! Label placeholder substitution for configured names.
//!
//! Templates use `{label}` for a plain substitution or `{<delim>:label}`
//! to insert `<delim>` right before the label value, e.g.
//! `Provision{_:label}` becomes `Provision_linux` for label `linux`.

use std::sync::LazyLock;

use regex::Regex;

/// The plain placeholder token.
pub const LABEL_TOKEN: &str = "{label}";

static DELIMITED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^{}]*):label\}").expect("delimited label pattern is valid")
});

/// Substitute `label` into `template`.
///
/// The delimited form takes precedence: when present, every occurrence of
/// the first delimited token found is replaced. Otherwise every `{label}`
/// is replaced. A template without either form is returned unchanged.
pub fn resolve_label(template: &str, label: &str) -> String {
    if let Some(caps) = DELIMITED_TOKEN.captures(template) {
        let token = &caps[0];
        let delim = &caps[1];
        return template.replace(token, &format!("{delim}{label}"));
    }
    template.replace(LABEL_TOKEN, label)
}

/// Whether `template` carries any label placeholder.
pub fn has_label_placeholder(template: &str) -> bool {
    template.contains(LABEL_TOKEN) || DELIMITED_TOKEN.is_match(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_token() {
        assert_eq!(resolve_label("{label}", "agent"), "agent");
        assert_eq!(
            resolve_label("AgentDockerProvision{label}", "Label"),
            "AgentDockerProvisionLabel"
        );
    }

    #[test]
    fn delimited_token() {
        assert_eq!(
            resolve_label("AgentDockerProvision{_:label}", "Label"),
            "AgentDockerProvision_Label"
        );
        assert_eq!(
            resolve_label("AgentDockerProvision{VM:label}", "Label"),
            "AgentDockerProvisionVMLabel"
        );
        assert_eq!(resolve_label("prefix{X:label}", "L"), "prefixXL");
    }

    #[test]
    fn empty_delimiter() {
        assert_eq!(resolve_label("{:label}", "agent"), "agent");
        assert_eq!(
            resolve_label("AgentDockerProvision{:label}", "Label"),
            "AgentDockerProvisionLabel"
        );
    }

    #[test]
    fn no_token_is_unchanged() {
        assert_eq!(
            resolve_label("AgentDockerProvision", "Label"),
            "AgentDockerProvision"
        );
        assert_eq!(resolve_label("", "Label"), "");
    }

    #[test]
    fn repeated_tokens() {
        assert_eq!(
            resolve_label("registry/{label}:{label}", "linux"),
            "registry/linux:linux"
        );
        assert_eq!(resolve_label("a{-:label}b{-:label}", "x"), "a-xb-x");
    }

    #[test]
    fn placeholder_detection() {
        assert!(has_label_placeholder("img-{label}"));
        assert!(has_label_placeholder("img{/:label}"));
        assert!(!has_label_placeholder("img-latest"));
    }
}
