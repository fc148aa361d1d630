/// Extensions accepted for uploads, compared lowercase.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// The maximum file size that an uploaded image can be in order to be decoded.
///
/// This value is in MiB.
pub(crate) const GENERIC_MAXIMUM_FILE_SIZE: u64 = MIB * 24;

/// Per channel mean used by CLIP style vision towers.
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// Per channel standard deviation used by CLIP style vision towers.
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// The size of 1MiB in bytes
const MIB: u64 = 1_048_576;
