//! Shell snippet helpers shared by the bootstrap procedure and remote writers

use std::path::Path;

/// Heredoc delimiter for embedded file contents
pub const FILE_DELIMITER: &str = "GUILD_EOF";

/// Quote a value for POSIX sh
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Write `contents` to `path` unless the file already exists
pub fn write_if_absent(path: &Path, contents: &str, label: &str) -> String {
    let path = quote(&path.display().to_string());
    let body = contents.trim_end_matches('\n');
    format!(
        "if [ -f {path} ]; then\n\
         \techo \"{label} already exists ✅\"\n\
         else\n\
         \tcat > {path} <<'{FILE_DELIMITER}'\n\
         {body}\n\
         {FILE_DELIMITER}\n\
         \techo \"{label} created ✅\"\n\
         fi\n"
    )
}

/// Restrict `path` to `mode` if it exists; a no-op otherwise
pub fn restrict_if_present(path: &Path, mode: u32) -> String {
    let path = quote(&path.display().to_string());
    format!("if [ -f {path} ]; then\n\tchmod {mode:o} {path}\nfi\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("/etc/guildserver"), "/etc/guildserver");
        assert_eq!(quote("METRICS_CONFIG={\"a\":1}"), "'METRICS_CONFIG={\"a\":1}'");
        assert_eq!(quote("it's"), r#"'it'\''s'"#);
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_write_if_absent() {
        let snippet = write_if_absent(Path::new("/etc/g/traefik.yml"), "a: 1\n", "Traefik config");
        assert!(snippet.starts_with("if [ -f /etc/g/traefik.yml ]; then"));
        assert!(snippet.contains("cat > /etc/g/traefik.yml <<'GUILD_EOF'\na: 1\nGUILD_EOF\n"));
    }

    #[test]
    fn test_restrict_mode_is_octal() {
        let snippet = restrict_if_present(Path::new("/etc/g/acme.json"), 0o600);
        assert!(snippet.contains("chmod 600 /etc/g/acme.json"));
    }
}
