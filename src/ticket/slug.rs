const MAX_SLUG_LENGTH: usize = 20;
const FALLBACK_SLUG: &str = "ticket";

/// Turn a title into a lowercase, hyphen-separated slug safe for tmux
/// window names, URLs and shell arguments.
///
/// Non-ASCII letters are dropped: window names must pass
/// [`validate_tmux_name`](crate::spawn::validate_tmux_name).
///
/// The slug is at most 20 characters and is cut at a word boundary when
/// possible. Titles with nothing usable produce `ticket`.
pub fn generate_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        let c = if c == ' ' || c == '_' { '-' } else { c };
        if c == '-' {
            if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        } else if c.is_ascii_alphanumeric() {
            slug.push(c);
        }
    }

    let mut slug = slug.trim_matches('-').to_string();

    if slug.len() > MAX_SLUG_LENGTH {
        slug = truncate_at_word_boundary(&slug, MAX_SLUG_LENGTH);
    }

    if slug.is_empty() {
        return FALLBACK_SLUG.to_string();
    }

    slug
}

fn truncate_at_word_boundary(slug: &str, max_len: usize) -> String {
    // Only ASCII survives slugging, so byte offsets are char offsets
    let truncated = &slug[..max_len];
    match truncated.rfind('-') {
        Some(idx) if idx > 0 => truncated[..idx].to_string(),
        _ => truncated.to_string(),
    }
}
