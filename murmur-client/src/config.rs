/// What happens to the replies of a deleted top-level comment
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanPolicy {
    /// Replies stay in the store with a dangling parent and are no longer rendered
    #[default]
    Keep,

    /// Replies are deleted along with their parent, their votes first
    CascadeReplies,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// In characters, after trimming
    pub max_body_len: usize,
    pub orphan_policy: OrphanPolicy,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_body_len: 10_000,
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let c: Config = serde_json::from_str(r#"{"orphan_policy":"cascade-replies"}"#).unwrap();
        assert_eq!(c.orphan_policy, OrphanPolicy::CascadeReplies);
        assert_eq!(c.max_body_len, Config::default().max_body_len);
    }
}
