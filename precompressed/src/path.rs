/// Normalize a request path
///
/// The result always starts with `/`. Empty and `.` segments are dropped and
/// `..` removes the preceding segment, never climbing above the root. A
/// trailing slash on the input is kept, so directory-shaped requests stay
/// recognizable after cleaning.
pub fn clean(path: &str) -> String {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    let mut cleaned = String::with_capacity(path.len() + 1);
    for segment in &segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }

    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if cleaned.is_empty() || trailing {
        cleaned.push('/');
    }

    cleaned
}
