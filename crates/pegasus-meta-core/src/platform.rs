//! Platform registry
//!
//! Platforms come from a JavaScript-style definition file holding a list of
//! object literals:
//!
//! ```text
//! { fullname: "Nintendo - NES (FCEUmm)", sysname: "Nintendo Entertainment System",
//!   exts: "nes,fds,unf", abbr: "nes", core: "fceumm_libretro_android.so" },
//! ```
//!
//! Each object is parsed on its own. A broken object produces a
//! [`RegistryIssue`] and the rest of the file still loads.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive::Extensions;
use crate::error::{Error, Result};

/// Placeholder the front-end replaces with the ROM path at launch time
pub const FILE_PATH_PLACEHOLDER: &str = "{file.path}";

/// Placeholder replaced with the platform's libretro core
pub const CORE_PLACEHOLDER: &str = "{core}";

/// RetroArch on Android, started through the activity manager
pub const RETROARCH_ANDROID: &str = "am start -n com.retroarch/.browser.retroactivity.RetroActivityFuture
-e ROM {file.path}
-e LIBRETRO /data/data/com.retroarch/cores/{core}
-e CONFIGFILE /storage/emulated/0/Android/data/com.retroarch/files/retroarch.cfg
-e QUITFOCUS
--activity-clear-task
--activity-clear-top
--activity-no-history";

/// Multi-line launch command with `{core}` and `{file.path}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTemplate(String);

impl Default for LaunchTemplate {
    fn default() -> Self {
        LaunchTemplate(RETROARCH_ANDROID.to_string())
    }
}

impl LaunchTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        LaunchTemplate(template.into())
    }

    /// Substitute the core; `{file.path}` is left for the front-end
    pub fn expand(&self, core: &str) -> String {
        self.0.replace(CORE_PLACEHOLDER, core)
    }
}

/// One emulator configuration for a system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub full_name: String,
    pub system_name: String,
    pub extensions: Vec<String>,
    pub abbreviation: String,
    pub core: String,
}

impl Platform {
    pub fn allowed_extensions(&self) -> Extensions {
        Extensions::new(&self.extensions)
    }

    fn from_fields(fields: &HashMap<String, String>) -> std::result::Result<Self, String> {
        let required = |key: &str| {
            fields
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| format!("missing required field `{}`", key))
        };
        let optional = |key: &str| fields.get(key).cloned().unwrap_or_default();

        Ok(Platform {
            full_name: required("fullname")?,
            core: required("core")?,
            system_name: optional("sysname"),
            extensions: optional("exts")
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
            abbreviation: optional("abbr"),
        })
    }
}

/// A definition entry that could not be turned into a platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryIssue {
    /// Zero-based position of the object in the file
    pub index: usize,
    /// One-based line the object starts on
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for RegistryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry #{} (line {}): {}", self.index, self.line, self.reason)
    }
}

/// All known platforms, in definition order
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: Vec<Platform>,
}

impl PlatformRegistry {
    pub fn new(platforms: Vec<Platform>) -> Self {
        Self { platforms }
    }

    /// Read and parse a definition file
    pub fn load(path: &Path) -> Result<(Self, Vec<RegistryIssue>)> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let (registry, issues) = Self::parse(&source);
        for issue in &issues {
            tracing::warn!("Skipping platform in {}: {}", path.display(), issue);
        }
        if registry.is_empty() && !issues.is_empty() {
            return Err(Error::Registry(format!(
                "no usable platforms in {} ({} malformed entries)",
                path.display(),
                issues.len()
            )));
        }
        tracing::debug!("Loaded {} platforms from {}", registry.len(), path.display());
        Ok((registry, issues))
    }

    pub fn parse(source: &str) -> (Self, Vec<RegistryIssue>) {
        let mut parser = Parser::new(source);
        let mut platforms = Vec::new();
        let mut issues = Vec::new();
        let mut index = 0;

        while let Some(line) = parser.seek_object() {
            let parsed = parser.object().and_then(|fields| Platform::from_fields(&fields));
            match parsed {
                Ok(platform) => platforms.push(platform),
                Err(reason) => {
                    parser.recover();
                    issues.push(RegistryIssue { index, line, reason });
                }
            }
            index += 1;
        }

        (Self { platforms }, issues)
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Platforms whose abbreviation matches a ROM folder name, case-insensitively
    pub fn candidates(&self, folder_name: &str) -> Vec<&Platform> {
        let key = folder_name.to_lowercase();
        self.platforms
            .iter()
            .filter(|p| p.abbreviation.to_lowercase() == key)
            .collect()
    }

    pub fn find(&self, full_name: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.full_name == full_name)
    }
}

/// Character cursor over the definition source
struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn skip_comment(&mut self) -> bool {
        if self.starts_with("//") {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.bump();
            }
            true
        } else if self.starts_with("/*") {
            self.bump();
            self.bump();
            while self.peek().is_some() && !self.starts_with("*/") {
                self.bump();
            }
            self.bump();
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            if self.skip_comment() {
                continue;
            }
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.bump();
                }
                _ => break,
            }
        }
    }

    /// Advance past the next top-level `{`, returning its line
    fn seek_object(&mut self) -> Option<usize> {
        loop {
            if self.skip_comment() {
                continue;
            }
            match self.peek()? {
                '{' => {
                    let line = self.line;
                    self.bump();
                    return Some(line);
                }
                '"' | '\'' | '`' => {
                    let _ = self.string();
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Skip to just after the closing brace of a broken object
    fn recover(&mut self) {
        if self.chars.get(self.pos.wrapping_sub(1)) == Some(&'}') {
            return;
        }
        while let Some(c) = self.bump() {
            if c == '}' {
                break;
            }
        }
    }

    fn string(&mut self) -> std::result::Result<String, String> {
        let start_line = self.line;
        let Some(quote) = self.bump() else {
            return Err("expected a string".to_string());
        };
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => break,
                },
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(format!("unterminated string starting on line {}", start_line))
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' || c == '-' {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    fn bare_value(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, ',' | '}' | '\n') {
                break;
            }
            out.push(c);
            self.bump();
        }
        out.trim().to_string()
    }

    /// Parse `key: value` pairs up to the closing brace
    fn object(&mut self) -> std::result::Result<HashMap<String, String>, String> {
        let mut fields = HashMap::new();
        loop {
            self.skip_trivia();
            let key = match self.peek() {
                None => return Err("unterminated object".to_string()),
                Some('}') => {
                    self.bump();
                    return Ok(fields);
                }
                Some('"' | '\'') => self.string()?,
                Some(_) => self.word(),
            };
            if key.is_empty() {
                let found = self.peek().unwrap_or(' ');
                return Err(format!("unexpected character {:?} on line {}", found, self.line));
            }

            while matches!(self.peek(), Some(c) if c.is_whitespace() && c != '\n') {
                self.bump();
            }
            if self.peek() != Some(':') {
                return Err(format!("expected `:` after `{}` on line {}", key, self.line));
            }
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }

            let value = match self.peek() {
                Some('"' | '\'' | '`') => self.string()?,
                Some('{' | '[') => {
                    return Err(format!("nested value for `{}` is not supported", key));
                }
                Some(_) => self.bare_value(),
                None => return Err("unterminated object".to_string()),
            };
            fields.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITIONS: &str = r#"
// Cores shipped with the Android build
const cores = [
  { fullname: "Nintendo - NES (FCEUmm)", sysname: "Nintendo Entertainment System",
    exts: "nes, fds,unf", abbr: "nes", core: "fceumm_libretro_android.so" },
  { fullname: 'Nintendo - NES (Nestopia)', abbr: "nes", core: "nestopia_libretro_android.so", extra: 3 },
  { fullname: "Broken - no core", abbr: "gb" },
  { fullname: "Sega - Mega Drive", sysname: "Sega Genesis", exts: "md,gen", abbr: "MD",
    core: "genesis_plus_gx_libretro_android.so" },
];
"#;

    #[test]
    fn test_parse_definitions() {
        let (registry, issues) = PlatformRegistry::parse(DEFINITIONS);
        assert_eq!(registry.len(), 3);

        let fceumm = &registry.platforms()[0];
        assert_eq!(fceumm.system_name, "Nintendo Entertainment System");
        assert_eq!(fceumm.extensions, vec!["nes", "fds", "unf"]);
        assert_eq!(fceumm.core, "fceumm_libretro_android.so");

        let nestopia = &registry.platforms()[1];
        assert_eq!(nestopia.system_name, "");
        assert!(nestopia.extensions.is_empty());

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].index, 2);
        assert_eq!(issues[0].line, 7);
        assert!(issues[0].reason.contains("core"));
    }

    #[test]
    fn test_candidates_by_folder_name() {
        let (registry, _) = PlatformRegistry::parse(DEFINITIONS);
        let nes = registry.candidates("NES");
        assert_eq!(nes.len(), 2);
        assert_eq!(nes[0].full_name, "Nintendo - NES (FCEUmm)");
        assert_eq!(registry.candidates("md").len(), 1);
        assert!(registry.candidates("snes").is_empty());
    }

    #[test]
    fn test_syntax_error_is_isolated() {
        let source = r#"
{ fullname: "A", core: "a.so" }
{ fullname "B", core: "b.so" }
{ fullname: "C", core: "c.so", nested: { x: 1 } }
{ fullname: "D", core: "d.so" }
"#;
        let (registry, issues) = PlatformRegistry::parse(source);
        let names: Vec<&str> = registry.platforms().iter().map(|p| p.full_name.as_str()).collect();
        assert_eq!(names, vec!["A", "D"]);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line, 3);
        assert_eq!(issues[1].line, 4);
    }

    #[test]
    fn test_escapes_in_strings() {
        let (registry, issues) = PlatformRegistry::parse(r#"{ fullname: "Say \"hi\"", core: "x.so" }"#);
        assert!(issues.is_empty());
        assert_eq!(registry.platforms()[0].full_name, "Say \"hi\"");
    }

    #[test]
    fn test_launch_template_expansion() {
        let launch = LaunchTemplate::default().expand("fceumm_libretro_android.so");
        assert!(launch.contains("-e LIBRETRO /data/data/com.retroarch/cores/fceumm_libretro_android.so"));
        assert!(launch.contains("-e ROM {file.path}"));
        assert_eq!(launch.lines().count(), 8);

        let custom = LaunchTemplate::new("retroarch -L {core} {file.path}").expand("snes9x");
        assert_eq!(custom, "retroarch -L snes9x {file.path}");
    }
}
