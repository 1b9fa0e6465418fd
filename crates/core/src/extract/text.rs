use encoding_rs::WINDOWS_1252;

/// UTF-8 first, then the single-byte legacy encoding. windows-1252 maps every byte, so this
/// never fails.
pub(super) fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.strip_prefix('\u{feff}').unwrap_or(s).to_string(),
        Err(err) => {
            tracing::debug!(error = %err, "input is not UTF-8; decoding as windows-1252");
            let (cow, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            cow.into_owned()
        }
    }
}
