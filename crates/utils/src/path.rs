//! Helpers for turning client supplied names into something safe to put on disk.

use unicode_normalization::UnicodeNormalization;

const WINDOWS_DEVICE_FILES: [&str; 22] = [
	"CON", "AUX", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9", "LPT1",
	"LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9", "PRN", "NUL",
];

/// Reduce an uploaded file name to a flat, ASCII only name.
///
/// The name is NFKD decomposed first so accented letters keep their base letter. Path separators become whitespace, whitespace runs collapse into a single `_`,
/// anything outside `[A-Za-z0-9_.-]` is dropped and leading/trailing `.` and `_`
/// are stripped. The result may be empty, callers must treat that as invalid.
#[must_use]
pub fn secure_filename(filename: &str) -> String {
	let flattened = filename
		.nfkd()
		.filter(char::is_ascii)
		.map(|c| if c == '/' || c == '\\' { ' ' } else { c })
		.collect::<String>();

	let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");

	let stripped = joined
		.chars()
		.filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
		.collect::<String>();

	let name = stripped.trim_matches(|c| c == '.' || c == '_').to_string();

	let is_device_file = name
		.split('.')
		.next()
		.is_some_and(|stem| {
			WINDOWS_DEVICE_FILES
				.iter()
				.any(|device| device.eq_ignore_ascii_case(stem))
		});

	if is_device_file {
		format!("_{name}")
	} else {
		name
	}
}

/// Validate a single path segment received in a URL.
///
/// Rejects empty segments and anything containing `..`, path separators or null bytes,
/// axum has already percent-decoded the segment at this point.
#[must_use]
pub fn is_safe_path_segment(segment: &str) -> bool {
	!(segment.is_empty()
		|| segment.contains("..")
		|| segment.contains('/')
		|| segment.contains('\\')
		|| segment.contains('\0'))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_directories_and_spaces() {
		assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
		assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
		assert_eq!(secure_filename("..\\windows\\photo.png"), "windows_photo.png");
	}

	#[test]
	fn folds_accents_and_drops_the_rest() {
		assert_eq!(secure_filename("chair (1)?.jpg"), "chair_1.jpg");
		assert_eq!(secure_filename("ñandú.gif"), "nandu.gif");
		assert_eq!(secure_filename("ﬁle①.png"), "file1.png");
		assert_eq!(secure_filename("日本.png"), "png");
		assert_eq!(secure_filename("..."), "");
	}

	#[test]
	fn prefixes_windows_device_names() {
		assert_eq!(secure_filename("con.png"), "_con.png");
		assert_eq!(secure_filename("console.png"), "console.png");
	}

	#[test]
	fn path_segments() {
		assert!(is_safe_path_segment("chair.obj"));
		assert!(!is_safe_path_segment(""));
		assert!(!is_safe_path_segment("../secret.obj"));
		assert!(!is_safe_path_segment("a/b.obj"));
		assert!(!is_safe_path_segment("a\0.obj"));
	}
}
