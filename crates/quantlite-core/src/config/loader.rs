//! 统一环境变量加载逻辑
//!
//! Keeps the fallback chain in one place so call sites never repeat `or_else`.

use std::env;

/// Read `primary`, then each alias in order; empty values count as unset.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default)
}

/// Like [`env_or`] but returns `None` when unset or blank.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// 解析布尔型环境变量：0/false/no/off 为 false，其余已设置的值为 true
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let v = env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()));
    match v.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns a distinct key so parallel test threads never race.
    fn set(key: &str, value: &str) {
        env::set_var(key, value);
    }

    #[test]
    fn test_env_or_falls_back_to_alias_then_default() {
        set("QUANTLITE_TEST_ALIAS_B", "from-alias");
        assert_eq!(
            env_or("QUANTLITE_TEST_ALIAS_A", &["QUANTLITE_TEST_ALIAS_B"], || "d".into()),
            "from-alias"
        );
        assert_eq!(env_or("QUANTLITE_TEST_UNSET_X", &[], || "d".into()), "d");
    }

    #[test]
    fn test_env_optional_blank_is_none() {
        set("QUANTLITE_TEST_BLANK", "   ");
        assert_eq!(env_optional("QUANTLITE_TEST_BLANK", &[]), None);
    }

    #[test]
    fn test_env_bool_parsing() {
        set("QUANTLITE_TEST_BOOL_OFF", "off");
        set("QUANTLITE_TEST_BOOL_ON", "yes");
        assert!(!env_bool("QUANTLITE_TEST_BOOL_OFF", &[], true));
        assert!(env_bool("QUANTLITE_TEST_BOOL_ON", &[], false));
        assert!(env_bool("QUANTLITE_TEST_BOOL_UNSET", &[], true));
    }
}
