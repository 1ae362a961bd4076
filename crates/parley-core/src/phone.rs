//! Phone number and chat id handling.

const GROUP_SUFFIX: &str = "@g.us";

/// Normalize a provider address (`60123456789@c.us`, `+60 12-345 6789`,
/// `60123456789:12@s.whatsapp.net`) to a canonical `+<digits>` key.
///
/// Input without any digits is returned trimmed and unchanged.
pub fn normalize_phone(raw: &str) -> String {
    let address = raw.trim();
    let local = address.split('@').next().unwrap_or(address);
    let local = local.split(':').next().unwrap_or(local);
    let digits: String = local.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        address.to_owned()
    } else {
        format!("+{digits}")
    }
}

pub fn is_group_chat(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_provider_addresses() {
        assert_eq!(normalize_phone("60123456789@c.us"), "+60123456789");
        assert_eq!(normalize_phone("+60 12-345 6789"), "+60123456789");
        assert_eq!(
            normalize_phone("60123456789:12@s.whatsapp.net"),
            "+60123456789"
        );
    }

    #[test]
    fn keeps_non_numeric_input() {
        assert_eq!(normalize_phone("  status@broadcast "), "status@broadcast");
    }

    #[test]
    fn detects_group_chats() {
        assert!(is_group_chat("120363025246125486@g.us"));
        assert!(!is_group_chat("60123456789@c.us"));
    }
}
