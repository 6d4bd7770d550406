//! Language token normalization.

/// Common aliases and their canonical names.
const ALIASES: &[(&str, &str)] = &[
    ("py", "python"),
    ("py3", "python"),
    ("python3", "python"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("node", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("sh", "bash"),
    ("shell", "bash"),
    ("zsh", "bash"),
    ("console", "bash"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("c++", "cpp"),
    ("cc", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("c#", "csharp"),
    ("kt", "kotlin"),
    ("golang", "go"),
    ("ps1", "powershell"),
    ("pwsh", "powershell"),
    ("tf", "hcl"),
    ("text", ""),
    ("txt", ""),
    ("plaintext", ""),
    ("plain", ""),
];

/// Canonical language for an info-string token.
///
/// Accepts `{.lang}` and `.lang` attribute forms and is case-insensitive.
/// Unknown tokens are returned lowercased.
pub fn resolve_language(raw: &str) -> String {
    let token = raw
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .trim_start_matches('.');
    let token = token.split([',', ' ']).next().unwrap_or_default().to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == token)
        .map_or(token, |(_, canonical)| (*canonical).to_string())
}

/// Language named by a `#!` interpreter line, if any.
pub fn language_from_shebang(line: &str) -> Option<String> {
    let rest = line.strip_prefix("#!")?.trim();
    let mut words = rest.split_whitespace();
    let program = words.next()?;
    let program = program.rsplit('/').next().unwrap_or(program);
    // `#!/usr/bin/env [-S] python3`
    let interpreter = if program == "env" {
        words.find(|w| !w.starts_with('-'))?
    } else {
        program
    };
    let name = interpreter.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    let resolved = resolve_language(name);
    (!resolved.is_empty()).then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(resolve_language("py"), "python");
        assert_eq!(resolve_language("JS"), "javascript");
        assert_eq!(resolve_language("shell"), "bash");
        assert_eq!(resolve_language("{.rs}"), "rust");
        assert_eq!(resolve_language("haskell"), "haskell");
        assert_eq!(resolve_language("text"), "");
        assert_eq!(resolve_language(""), "");
    }

    #[test]
    fn test_shebang() {
        assert_eq!(language_from_shebang("#!/usr/bin/env python3"), Some("python".into()));
        assert_eq!(
            language_from_shebang("#!/usr/bin/env -S node --flag"),
            Some("javascript".into())
        );
        assert_eq!(language_from_shebang("#!/bin/sh"), Some("bash".into()));
        assert_eq!(language_from_shebang("#! /usr/bin/ruby2.7"), Some("ruby".into()));
        assert_eq!(language_from_shebang("# comment"), None);
        assert_eq!(language_from_shebang("#!"), None);
    }
}
