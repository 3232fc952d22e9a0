use std::io::{Cursor, Read};

use image::{
    codecs::gif::{GifEncoder, Repeat},
    imageops::{self, FilterType},
    Delay, Frame, ImageReader, RgbaImage,
};
use zip::ZipArchive;

use crate::domain::RelayError;

const MAX_SIDE: u32 = 720;
const DEFAULT_DELAY_MS: u32 = 100;
const ENCODER_SPEED: i32 = 10;

/// Turns a ugoira frame archive into a looping GIF. Frames are taken in file name
/// order and paired with `frame_delays` by position.
pub fn render_gif(archive: &[u8], frame_delays: &[u32]) -> Result<Vec<u8>, RelayError> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(media_error)?;
    let mut names: Vec<String> = zip
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();
    if names.is_empty() {
        return Err(RelayError::Media {
            reason: "ugoira archive has no frames".into(),
        });
    }

    let mut frames = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let mut entry = zip.by_name(name).map_err(media_error)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).map_err(media_error)?;

        let image = image::load_from_memory(&bytes).map_err(media_error)?.to_rgba8();
        let delay = frame_delays
            .get(index)
            .copied()
            .filter(|delay| *delay > 0)
            .unwrap_or(DEFAULT_DELAY_MS);
        frames.push(Frame::from_parts(
            shrink(image),
            0,
            0,
            Delay::from_numer_denom_ms(delay, 1),
        ));
    }

    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, ENCODER_SPEED);
        encoder.set_repeat(Repeat::Infinite).map_err(media_error)?;
        encoder.encode_frames(frames).map_err(media_error)?;
    }
    Ok(out)
}

pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn shrink(image: RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= MAX_SIDE {
        return image;
    }
    let scale = f64::from(MAX_SIDE) / f64::from(longest);
    let new_width = ((f64::from(width) * scale).round() as u32).max(1);
    let new_height = ((f64::from(height) * scale).round() as u32).max(1);
    imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}

fn media_error(err: impl std::fmt::Display) -> RelayError {
    RelayError::Media {
        reason: err.to_string(),
    }
}
