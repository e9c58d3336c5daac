//! Which local paths take part in a sync.

/// Segments that stay eligible even though they start with a dot.
const HIDDEN_EXCEPTIONS: [&str; 2] = [".well-known", ".htaccess"];

/// Dependency and bytecode cache folder names. Any path containing one is left out.
const EXCLUDED_DIRS: [&str; 3] = ["node_modules", "__pycache__", "__py_cache__"];

fn is_exception(segment: &str) -> bool {
    HIDDEN_EXCEPTIONS.iter().any(|e| segment.contains(e))
}

/// Decide whether a `/`-separated path, relative to the sync root, is left out.
///
/// Rules, first match wins:
/// 1. last segment contains `.well-known` or `.htaccess`: keep
/// 2. a segment starts with `.` and is not one of those exceptions: skip
/// 3. the path contains `node_modules` or a Python bytecode cache name: skip
/// 4. keep
pub fn should_skip(relative_path: &str) -> bool {
    let mut segments = relative_path.split('/').filter(|s| !s.is_empty());

    if segments.clone().last().is_some_and(is_exception) {
        return false;
    }

    if segments.any(|segment| segment.starts_with('.') && !is_exception(segment)) {
        return true;
    }

    EXCLUDED_DIRS.iter().any(|dir| relative_path.contains(dir))
}
