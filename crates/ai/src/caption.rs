use crate::{
	error::Error,
	onnx::{Input, OnnxModel},
};

use pf_images::ImageTransform;
use pf_utils::error::FileIOError;

use std::{borrow::Cow, io, path::Path};

use image::RgbImage;
use ndarray::{s, Array2, ArrayD, Ix3};
use tokenizers::Tokenizer;
use tracing::debug;

pub trait Captioner: Send + Sync {
	fn caption(&self, image: &RgbImage) -> Result<String, Error>;
}

/// BLIP image captioning: a vision encoder producing `image_embeds` from `pixel_values`, and a
/// text decoder greedily unrolled from the BOS token until SEP, and the BERT tokenizer the
/// decoder was trained with.
#[derive(Debug)]
pub struct BlipCaptioner {
	vision: OnnxModel,
	decoder: OnnxModel,
	tokenizer: Tokenizer,
	transform: ImageTransform,
	max_length: usize,
}

impl BlipCaptioner {
	pub const IMAGE_SIZE: u32 = 384;
	pub const MAX_LENGTH: usize = 100;

	const BOS_TOKEN_ID: i64 = 30522;
	const SEP_TOKEN_ID: i64 = 102;

	pub fn load(
		vision: impl AsRef<Path>,
		decoder: impl AsRef<Path>,
		tokenizer: impl AsRef<Path>,
	) -> Result<Self, Error> {
		Ok(Self {
			vision: OnnxModel::load("blip_vision", vision)?,
			decoder: OnnxModel::load("blip_text_decoder", decoder)?,
			tokenizer: load_tokenizer(tokenizer.as_ref())?,
			transform: ImageTransform::blip(Self::IMAGE_SIZE),
			max_length: Self::MAX_LENGTH,
		})
	}

	fn next_token(&self, tokens: &[i64], image_embeds: &ArrayD<f32>) -> Result<i64, Error> {
		let input_ids = Array2::from_shape_vec((1, tokens.len()), tokens.to_vec())?;
		let attention_mask = Array2::<i64>::ones((1, tokens.len()));

		let logits = self.decoder.run(
			vec![
				(Cow::Borrowed("input_ids"), Input::I64(input_ids.into_dyn())),
				(
					Cow::Borrowed("attention_mask"),
					Input::I64(attention_mask.into_dyn()),
				),
				(
					Cow::Borrowed("encoder_hidden_states"),
					Input::F32(image_embeds.clone()),
				),
			],
			"logits",
		)?
		.into_dimensionality::<Ix3>()?;

		if logits.shape()[1] == 0 {
			return Err(Error::InvalidInput(format!(
				"unexpected logits shape {:?}",
				logits.shape()
			)));
		}

		let last = logits.slice(s![0, -1, ..]);

		last.iter()
			.enumerate()
			.fold(None, |best: Option<(usize, f32)>, (id, &logit)| match best {
				Some((_, best_logit)) if best_logit >= logit => best,
				_ => Some((id, logit)),
			})
			.map(|(id, _)| id as i64)
			.ok_or_else(|| Error::InvalidInput("empty logits".to_string()))
	}
}

impl Captioner for BlipCaptioner {
	fn caption(&self, image: &RgbImage) -> Result<String, Error> {
		let pixel_values = self.transform.apply(image)?;

		let image_embeds = self.vision.run(
			vec![(
				Cow::Borrowed("pixel_values"),
				Input::F32(pixel_values.into_dyn()),
			)],
			"image_embeds",
		)?;

		let mut tokens = vec![Self::BOS_TOKEN_ID];
		while tokens.len() < self.max_length {
			let next = self.next_token(&tokens, &image_embeds)?;
			if next == Self::SEP_TOKEN_ID {
				break;
			}
			tokens.push(next);
		}

		let caption = decode_caption(&self.tokenizer, &tokens[1..])?;

		debug!(tokens = tokens.len(), %caption, "Captioned image");

		Ok(caption)
	}
}

/// Turn generated ids back into text the way BLIP's processor does with
/// `skip_special_tokens`, ids that cannot be tokens are dropped.
fn decode_caption(tokenizer: &Tokenizer, ids: &[i64]) -> Result<String, Error> {
	let ids = ids
		.iter()
		.filter_map(|&id| u32::try_from(id).ok())
		.collect::<Vec<_>>();

	tokenizer
		.decode(&ids, true)
		.map(|caption| caption.trim().to_string())
		.map_err(|e| Error::Tokenizer(e.to_string()))
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer, Error> {
	if !path.is_file() {
		return Err(FileIOError::from((
			path,
			io::Error::from(io::ErrorKind::NotFound),
			"Failed to read tokenizer",
		))
		.into());
	}

	Tokenizer::from_file(path).map_err(|e| Error::Tokenizer(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::fs;

	const TOKENIZER: &str = r###"{
		"version": "1.0",
		"truncation": null,
		"padding": null,
		"added_tokens": [
			{ "id": 0, "content": "[PAD]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
			{ "id": 1, "content": "[UNK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
			{ "id": 2, "content": "[CLS]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
			{ "id": 3, "content": "[SEP]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true }
		],
		"normalizer": null,
		"pre_tokenizer": null,
		"post_processor": null,
		"decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
		"model": {
			"type": "WordPiece",
			"unk_token": "[UNK]",
			"continuing_subword_prefix": "##",
			"max_input_chars_per_word": 100,
			"vocab": {
				"[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3, "a": 4, "man": 5, "riding": 6,
				"sky": 7, "##board": 8, ".": 9, "it": 10, "'s": 11, "red": 12, "[unused0]": 13
			}
		}
	}"###;

	fn tokenizer() -> (tempfile::TempDir, Tokenizer) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.json");
		fs::write(&path, TOKENIZER).unwrap();

		let tokenizer = load_tokenizer(&path).unwrap();
		(dir, tokenizer)
	}

	#[test]
	fn decodes_wordpieces() {
		let (_dir, tokenizer) = tokenizer();

		assert_eq!(
			decode_caption(&tokenizer, &[2, 4, 5, 6, 4, 7, 8, 9, 3]).unwrap(),
			"a man riding a skyboard."
		);
		assert_eq!(decode_caption(&tokenizer, &[10, 11, 12]).unwrap(), "it's red");
	}

	#[test]
	fn skips_special_tokens_only() {
		let (_dir, tokenizer) = tokenizer();

		assert_eq!(decode_caption(&tokenizer, &[0, 4, 1000, -3, 5]).unwrap(), "a man");
		assert_eq!(decode_caption(&tokenizer, &[4, 13]).unwrap(), "a [unused0]");
		assert_eq!(decode_caption(&tokenizer, &[]).unwrap(), "");
	}

	#[test]
	fn tokenizer_must_exist_and_parse() {
		let dir = tempfile::tempdir().unwrap();

		assert!(matches!(
			load_tokenizer(&dir.path().join("missing.json")),
			Err(Error::FileIO(_))
		));

		let garbage = dir.path().join("tokenizer.json");
		fs::write(&garbage, "[PAD]\nhello\n").unwrap();
		assert!(matches!(load_tokenizer(&garbage), Err(Error::Tokenizer(_))));
	}
}
