/// Normalize a binary-prefixed capacity ("10Gi") to the form ZFS accepts ("10G").
///
/// The conversion is lexical: only a trailing `i` after a unit letter is dropped,
/// no 1000/1024 rescaling is applied.
pub fn normalize_capacity(capacity: &str) -> String {
    let trimmed = capacity.trim();
    let mut chars = trimmed.chars().rev();
    match (chars.next(), chars.next()) {
        (Some('i'), Some(unit)) if "KMGTPE".contains(unit) => {
            trimmed[..trimmed.len() - 1].to_string()
        }
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_prefixes_are_stripped() {
        assert_eq!(normalize_capacity("1Gi"), "1G");
        assert_eq!(normalize_capacity("512Mi"), "512M");
        assert_eq!(normalize_capacity("2Ti"), "2T");
        assert_eq!(normalize_capacity("1Ei"), "1E");
    }

    #[test]
    fn test_other_forms_are_untouched() {
        assert_eq!(normalize_capacity("10G"), "10G");
        assert_eq!(normalize_capacity("4096"), "4096");
        assert_eq!(normalize_capacity(" 5Gi "), "5G");
        assert_eq!(normalize_capacity("i"), "i");
        assert_eq!(normalize_capacity(""), "");
    }
}
