/// Normalize an evidence path to its canonical archive form.
///
/// Rules: host separators become `/`, repeated slashes collapse, trailing
/// slashes are stripped (except for the root), and the result always leads
/// with `/`. The empty string, `.` and `/` all normalize to `/`.
pub fn normalize(name: &str) -> String {
    let name = name.replace('\\', "/");
    if name.is_empty() || name == "." || name == "/" {
        return "/".to_string();
    }
    let mut out = String::with_capacity(name.len() + 1);
    out.push('/');
    for segment in name.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if out.len() > 1 {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// The parent of a normalized path; `/` is its own parent.
pub fn parent(name: &str) -> &str {
    match name.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &name[..idx],
    }
}

/// The final segment of a normalized path; empty for the root.
pub fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or("")
}

/// True when `name` is an immediate child of the normalized directory `dir`:
/// it extends `dir` by exactly one segment.
pub fn is_child_of(name: &str, dir: &str) -> bool {
    let prefix_len = if dir == "/" { 1 } else { dir.len() + 1 };
    if dir != "/" && !(name.starts_with(dir) && name.as_bytes().get(dir.len()) == Some(&b'/')) {
        return false;
    }
    if dir == "/" && !name.starts_with('/') {
        return false;
    }
    let rest = &name[prefix_len.min(name.len())..];
    !rest.is_empty() && !rest.contains('/')
}
