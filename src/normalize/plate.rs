/// Canonical vehicle id from an operator's fleet code.
///
/// The first `TRAM` becomes `P` and surrounding whitespace is trimmed. Codes of
/// the form `B0…0<digits>` lose the `B` and the leading zeros (`B00042` → `42`).
pub fn clean_plate(raw: &str) -> String {
    let plate = raw.replacen("TRAM", "P", 1);
    let plate = plate.trim();

    if let Some(rest) = plate.strip_prefix('B') {
        let zero_padded = rest.len() >= 2
            && rest.starts_with('0')
            && rest.bytes().all(|b| b.is_ascii_digit());
        if zero_padded {
            let stripped = rest.trim_start_matches('0');
            return if stripped.is_empty() { "0".to_string() } else { stripped.to_string() };
        }
    }

    plate.to_string()
}
