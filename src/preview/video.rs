// ISO base media (MP4 / QuickTime) header parsing.
//
// Walks the box tree far enough to read the movie header (`moov/mvhd`) for
// duration and the first track header (`moov/trak/tkhd`) with a non-zero
// presentation size for dimensions.

use super::PreviewError;
use nom::{
    bytes::complete::take,
    error::{Error, ErrorKind},
    multi::many0,
    number::complete::{be_u32, be_u64, be_u8},
    IResult,
};

/// Header-level facts about a video file. Fields are absent when the
/// corresponding box is missing or malformed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoInfo {
    /// Seconds
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

struct Mp4Box<'a> {
    kind: &'a [u8],
    body: &'a [u8],
}

/// Parse the ISO-BMFF headers of a video file.
pub fn video_info(data: &[u8]) -> Result<VideoInfo, PreviewError> {
    let moov = children(data)
        .into_iter()
        .find(|b| b.kind == b"moov")
        .ok_or_else(|| PreviewError::UnsupportedFormat("no moov box".to_string()))?;

    let mut info = VideoInfo::default();

    for child in children(moov.body) {
        match child.kind {
            b"mvhd" => {
                if let Ok((_, (timescale, duration))) = movie_header(child.body) {
                    if timescale > 0 {
                        info.duration = Some(duration as f64 / timescale as f64);
                    }
                }
            }
            b"trak" if info.width.is_none() => {
                let size = children(child.body)
                    .into_iter()
                    .find(|b| b.kind == b"tkhd")
                    .and_then(|tkhd| track_header(tkhd.body).ok())
                    .map(|(_, size)| size);

                if let Some((width, height)) = size {
                    if width > 0 && height > 0 {
                        info.width = Some(width);
                        info.height = Some(height);
                    }
                }
            }
            _ => {}
        }
    }

    if info == VideoInfo::default() {
        return Err(PreviewError::UnsupportedFormat(
            "no movie or track header".to_string(),
        ));
    }

    Ok(info)
}

fn children(input: &[u8]) -> Vec<Mp4Box<'_>> {
    many0(mp4_box)(input)
        .map(|(_, boxes)| boxes)
        .unwrap_or_default()
}

fn mp4_box(input: &[u8]) -> IResult<&[u8], Mp4Box<'_>> {
    let (input, size) = be_u32(input)?;
    let (input, kind) = take(4usize)(input)?;

    let (input, body_len) = match size {
        // Box extends to the end of the enclosing data
        0 => (input, Some(input.len())),
        1 => {
            let (input, large) = be_u64(input)?;
            let len = usize::try_from(large).ok().and_then(|l| l.checked_sub(16));
            (input, len)
        }
        n => (input, (n as usize).checked_sub(8)),
    };

    let body_len = body_len.ok_or_else(|| nom::Err::Error(Error::new(input, ErrorKind::Verify)))?;
    let (input, body) = take(body_len)(input)?;

    Ok((input, Mp4Box { kind, body }))
}

/// `mvhd` → (timescale, duration in timescale units)
fn movie_header(input: &[u8]) -> IResult<&[u8], (u32, u64)> {
    let (input, version) = be_u8(input)?;
    let (input, _flags) = take(3usize)(input)?;

    if version == 1 {
        let (input, _times) = take(16usize)(input)?;
        let (input, timescale) = be_u32(input)?;
        let (input, duration) = be_u64(input)?;
        Ok((input, (timescale, duration)))
    } else {
        let (input, _times) = take(8usize)(input)?;
        let (input, timescale) = be_u32(input)?;
        let (input, duration) = be_u32(input)?;
        Ok((input, (timescale, duration as u64)))
    }
}

/// `tkhd` → presentation (width, height) in whole pixels
fn track_header(input: &[u8]) -> IResult<&[u8], (u32, u32)> {
    let (input, version) = be_u8(input)?;
    let (input, _flags) = take(3usize)(input)?;

    // times, track id, reserved, duration
    let header_len = if version == 1 { 32usize } else { 20usize };
    let (input, _) = take(header_len)(input)?;
    // reserved, layer, alternate group, volume, reserved, matrix
    let (input, _) = take(52usize)(input)?;

    let (input, width) = be_u32(input)?;
    let (input, height) = be_u32(input)?;

    // 16.16 fixed point
    Ok((input, (width >> 16, height >> 16)))
}
