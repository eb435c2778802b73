pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Turns a caller-supplied target into a fully qualified chat address.
///
/// Targets that already carry a server part are returned as they are. Bare numbers lose any
/// formatting characters and get the contact or group server appended. Returns `None` when no
/// user part is left, since such an address names nobody.
pub fn normalize_chat_address(target: &str, is_group: bool) -> Option<String> {
    let target = target.trim();
    if let Some((user, server)) = target.split_once('@') {
        if user.is_empty() || server.is_empty() {
            return None;
        }
        return Some(target.to_string());
    }

    let user: String = target
        .chars()
        .filter(|c| c.is_ascii_digit() || (is_group && *c == '-'))
        .collect();
    if !user.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let server = if is_group {
        GROUP_SERVER
    } else {
        DEFAULT_USER_SERVER
    };
    Some(format!("{user}@{server}"))
}

pub fn is_group_address(address: &str) -> bool {
    address.ends_with(&format!("@{GROUP_SERVER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_numbers_get_default_server() {
        assert_eq!(
            normalize_chat_address("+55 (11) 99999-0000", false).as_deref(),
            Some("5511999990000@s.whatsapp.net")
        );
    }

    #[test]
    fn group_targets_keep_their_dash() {
        let jid = normalize_chat_address("120363021033254949-1612345678", true).unwrap();
        assert_eq!(jid, "120363021033254949-1612345678@g.us");
        assert!(is_group_address(&jid));
    }

    #[test]
    fn qualified_addresses_are_untouched() {
        assert_eq!(
            normalize_chat_address(" 123@lid ", false),
            Some("123@lid".to_string())
        );
    }

    #[test]
    fn targets_without_a_user_are_rejected() {
        assert_eq!(normalize_chat_address("not-a-number", false), None);
        assert_eq!(normalize_chat_address("   ", false), None);
        assert_eq!(normalize_chat_address("--", true), None);
        assert_eq!(normalize_chat_address("@s.whatsapp.net", false), None);
        assert_eq!(normalize_chat_address("123@", false), None);
    }
}
