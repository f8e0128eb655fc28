use anyhow::{Result, anyhow, bail};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use ml_core::BoundingBox;
use video_ingest::{Frame, FrameFormat};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_OFFSET: i32 = 10;
const GLYPH_ADVANCE: i32 = 6;

/// Draw `boxes` over `frame` and encode the result as JPEG.
pub(crate) fn annotate_frame(
    frame: &Frame,
    boxes: &[BoundingBox],
    jpeg_quality: u8,
) -> Result<Vec<u8>> {
    let mut image = frame_to_rgb(frame)?;

    for bbox in boxes {
        for inset in 0..BOX_THICKNESS {
            draw_rectangle(
                &mut image,
                bbox.x1 + inset,
                bbox.y1 + inset,
                bbox.x2 - inset,
                bbox.y2 - inset,
                BOX_COLOR,
            );
        }
    }

    for bbox in boxes {
        let label_x = bbox.x1;
        let label_y = (bbox.y1 - LABEL_OFFSET).max(0);
        let text_width = bbox.label.chars().count() as i32 * GLYPH_ADVANCE;
        fill_rect(
            &mut image,
            label_x,
            label_y,
            label_x + text_width,
            label_y + 8,
            LABEL_BACKGROUND,
        );
        draw_label(&mut image, label_x + 1, label_y + 1, &bbox.label, BOX_COLOR);
    }

    encode_jpeg(&image, jpeg_quality)
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    if frame.width <= 0 || frame.height <= 0 {
        bail!("frame has invalid size {}x{}", frame.width, frame.height);
    }
    if frame.data.len() != frame.expected_len() {
        bail!(
            "frame carries {} bytes, expected {} for {}x{}",
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height
        );
    }
    let data = match frame.format {
        FrameFormat::Rgb8 => frame.data.clone(),
        FrameFormat::Bgr8 => bgr_to_rgb(&frame.data),
    };
    RgbImage::from_raw(frame.width as u32, frame.height as u32, data)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(3) {
        rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    rgb
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < left || bottom < top {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}
