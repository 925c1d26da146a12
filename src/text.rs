//! Text and file name helpers shared by the build and delivery stages

/// Longest file name (stem plus extension) written to the destination, in characters
pub const MAX_FILENAME_LENGTH: usize = 110;

/// Extensions (lower-case, without the dot) of files treated as audio tracks
pub const AUDIO_EXTENSIONS: [&str; 11] = [
    "mp3", "wav", "wma", "flac", "aac", "alac", "m4a", "ape", "wv", "ogg", "opus",
];

const FORBIDDEN_FILENAME_CHARS: [char; 18] = [
    '\u{0005}', '\u{0000}', '\u{001F}', '\u{007F}', '\u{2400}', '\\', '/', ':', '*', '?', '"',
    '<', '>', '|', '\t', '\n', '\r', '\u{000B}',
];

/// Split `text` into message-sized parts
///
/// Parts break right after a `\n` so that lines are never cut, and the parts
/// concatenate back to the input. The first part holds at most `first_limit`
/// characters, every later part at most `rest_limit`. A single line longer than
/// the applicable limit is cut at the limit.
///
/// # Example
///
/// ```
/// use feed_mirror::text::split_text_parts;
///
/// let parts = split_text_parts("aaa\nbbb\nccc", 5, 8);
/// assert_eq!(parts, vec!["aaa\n", "bbb\nccc"]);
/// ```
pub fn split_text_parts(text: &str, first_limit: usize, rest_limit: usize) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let limit_for = |parts: &Vec<String>| {
        if parts.is_empty() {
            first_limit.max(1)
        } else {
            rest_limit.max(1)
        }
    };

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len <= limit_for(&parts) {
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }

        let mut rest = line;
        let mut rest_len = line_len;
        while rest_len > limit_for(&parts) {
            let limit = limit_for(&parts);
            let cut = rest
                .char_indices()
                .nth(limit)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            parts.push(rest[..cut].to_string());
            rest = &rest[cut..];
            rest_len -= limit;
        }
        current.push_str(rest);
        current_len = rest_len;
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Make a name safe to use as a file name at the destination
///
/// Trims surrounding spaces and trailing dots, replaces characters that file
/// systems or the upload server reject with `_`, and shortens the stem so the
/// whole name fits [`MAX_FILENAME_LENGTH`] characters.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim_matches(' ').trim_end_matches('.');
    let cleaned: String = trimmed
        .chars()
        .map(|c| {
            if FORBIDDEN_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let (stem, extension) = split_extension(&cleaned);
    let max_stem = MAX_FILENAME_LENGTH.saturating_sub(extension.chars().count());
    if stem.chars().count() <= max_stem {
        return cleaned;
    }

    let stem: String = stem.chars().take(max_stem).collect();
    format!("{stem}{extension}")
}

/// Split a file name into stem and extension (with its leading dot)
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) => name.split_at(i),
        None => (name, ""),
    }
}

/// Lower-case extension of a path-like name, without the dot
pub fn extension_of(name: &str) -> Option<String> {
    let file = file_name_of(name);
    file.rfind('.')
        .map(|i| file[i + 1..].to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Last component of a `/` or `\` separated entry path
pub fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Whether an archive entry name has an accepted audio extension
pub fn is_audio_file(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// File name for an audio track
///
/// `"{NN}. {artist} - {title}.mp3"` when both tags are present,
/// `"{NN}. {title}.mp3"` with a title only, otherwise `source_name` with its
/// extension replaced by `.mp3`. The result is sanitized.
pub fn track_file_name(
    track_number: usize,
    title: Option<&str>,
    artist: Option<&str>,
    source_name: &str,
) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    let artist = artist.map(str::trim).filter(|a| !a.is_empty());

    let name = match (title, artist) {
        (Some(title), Some(artist)) => format!("{track_number:02}. {artist} - {title}.mp3"),
        (Some(title), None) => format!("{track_number:02}. {title}.mp3"),
        (None, _) => {
            let file = file_name_of(source_name);
            let (stem, _) = split_extension(file);
            format!("{stem}.mp3")
        }
    };
    sanitize_filename(&name)
}

/// Leading track number of names shaped like `"<digits>_<rest>"`
pub fn track_order(name: &str) -> Option<u32> {
    let file = file_name_of(name);
    let (digits, _) = file.split_once('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
