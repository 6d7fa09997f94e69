use std::path::{Component, Path};

/// Normalize a path to forward-slash form, dropping `.` components.
pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Normalize a repo-relative path string to forward-slash form.
pub fn normalize_slashes(path: &str) -> String {
    normalize_path(Path::new(&path.replace('\\', "/")))
}

/// Lowercased extension with leading dot (`.ts`), or empty string.
pub fn dotted_extension(path: &str) -> String {
    match Path::new(path).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
        None => String::new(),
    }
}

/// Whether `path` names a source file with one of the configured extensions.
pub fn has_source_extension(path: &str, extensions: &[String]) -> bool {
    let ext = dotted_extension(path);
    !ext.is_empty() && extensions.iter().any(|e| e == &ext)
}

/// Whether `path` names a spec file: `*.spec.<ext>` for a configured
/// extension.
pub fn is_spec_file(path: &str, extensions: &[String]) -> bool {
    let Some(file_name) = Path::new(path).file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    extensions.iter().any(|ext| {
        file_name
            .strip_suffix(ext.as_str())
            .map_or(false, |stem| stem.ends_with(".spec") && stem.len() > ".spec".len())
    })
}

/// Whether `path` lies under the directory `prefix` (both repo-relative,
/// forward-slash form). An empty prefix matches everything.
pub fn is_under(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "." {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

/// Rightmost identifier of a qualified name (`A.B.C` -> `C`).
pub fn rightmost_ident(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Whether a textual identifier names a class by convention: first
/// character uppercase.
pub fn looks_like_class_name(name: &str) -> bool {
    name.chars().next().is_some_and(|ch| ch.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec![".ts".to_string(), ".tsx".to_string()]
    }

    #[test]
    fn spec_file_naming() {
        assert!(is_spec_file("tests/login.spec.ts", &exts()));
        assert!(is_spec_file("tests/deep/cart.spec.tsx", &exts()));
        assert!(!is_spec_file("tests/login.ts", &exts()));
        assert!(!is_spec_file("tests/.spec.ts", &exts()));
        assert!(!is_spec_file("tests/login.spec.js", &exts()));
    }

    #[test]
    fn under_prefix() {
        assert!(is_under("tests/a.spec.ts", "tests"));
        assert!(is_under("tests/a.spec.ts", "tests/"));
        assert!(!is_under("testsuite/a.spec.ts", "tests"));
        assert!(is_under("anything", ""));
    }

    #[test]
    fn extension_forms() {
        assert_eq!(dotted_extension("src/Page.TS"), ".ts");
        assert_eq!(dotted_extension("Makefile"), "");
        assert!(has_source_extension("src/a.tsx", &exts()));
        assert!(!has_source_extension("src/a.js", &exts()));
    }

    #[test]
    fn identifier_helpers() {
        assert_eq!(rightmost_ident("A.B.C"), "C");
        assert!(looks_like_class_name("MyPage"));
        assert!(!looks_like_class_name("myPage"));
    }
}
