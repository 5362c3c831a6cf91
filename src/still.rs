//! Still photo processing
//!
//! Turns one composited BGRA frame into a JPEG on disk: swizzle to RGB,
//! rotate to the display orientation, encode at quality 90, and attach GPS
//! EXIF metadata when a geolocation fix is available.

use crate::capture::types::{GeoFix, PixelFormat, VideoFrame};
use crate::error::CamError;
use crate::geometry::Orientation;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use little_exif::rational::uR64;
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 90;

/// Process one captured frame into a JPEG file in `output_dir`.
///
/// Blocking; run on a blocking-capable thread.
pub fn process_still(
    frame: &VideoFrame,
    display_orientation: Orientation,
    fix: Option<&GeoFix>,
    output_dir: &Path,
) -> Result<PathBuf, CamError> {
    let format = frame.format;
    if format.pixel != PixelFormat::Bgra8 || frame.bytes().len() != format.byte_len() {
        return Err(CamError::Encode(format!(
            "malformed frame: {} bytes for {}x{}",
            frame.bytes().len(),
            format.width,
            format.height
        )));
    }

    let mut rgba = Vec::with_capacity(frame.bytes().len());
    for px in frame.bytes().chunks_exact(4) {
        rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    let image = RgbaImage::from_raw(format.width, format.height, rgba)
        .ok_or_else(|| CamError::Encode("frame dimensions overflow".to_string()))?;
    let image = rotate_to_display(DynamicImage::ImageRgba8(image), display_orientation);

    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}.jpg", uuid::Uuid::new_v4()));

    let rgb = image.to_rgb8();
    let file = std::fs::File::create(&path)?;
    let mut writer = std::io::BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| CamError::Encode(e.to_string()))?;
    drop(writer);

    if let Some(fix) = fix {
        write_gps_metadata(&path, fix)?;
    }

    tracing::info!("Still photo written: {:?} ({}x{})", path, rgb.width(), rgb.height());
    Ok(path)
}

/// Rotate a sensor-oriented (landscape) image to the display orientation.
///
/// An image that is already portrait-shaped skips the portrait rotations,
/// which covers frames composited with display-oriented output dimensions.
fn rotate_to_display(image: DynamicImage, orientation: Orientation) -> DynamicImage {
    let landscape_shaped = image.width() > image.height();
    match orientation.normalized() {
        Orientation::Portrait => {
            if landscape_shaped {
                image.rotate90()
            } else {
                image
            }
        }
        Orientation::PortraitUpsideDown => {
            if landscape_shaped {
                image.rotate270()
            } else {
                image
            }
        }
        Orientation::LandscapeLeft => image,
        Orientation::LandscapeRight => image.rotate180(),
        // normalized() never yields the flat variants
        _ => image,
    }
}

/// Split decimal degrees into degree/minute/second rationals, seconds kept
/// to two decimal places.
fn degrees_to_dms(value: f64) -> Vec<uR64> {
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = (value - degrees) * 60.0;
    let seconds = (minutes - minutes.trunc()) * 60.0;
    vec![
        uR64 {
            nominator: degrees as u32,
            denominator: 1,
        },
        uR64 {
            nominator: minutes.trunc() as u32,
            denominator: 1,
        },
        uR64 {
            nominator: (seconds * 100.0).round() as u32,
            denominator: 100,
        },
    ]
}

fn write_gps_metadata(path: &Path, fix: &GeoFix) -> Result<(), CamError> {
    use chrono::Timelike;

    let mut metadata = Metadata::new();

    metadata.set_tag(ExifTag::GPSVersionID(vec![2, 2, 0, 0]));

    metadata.set_tag(ExifTag::GPSLatitudeRef(
        if fix.latitude >= 0.0 { "N" } else { "S" }.to_string(),
    ));
    metadata.set_tag(ExifTag::GPSLatitude(degrees_to_dms(fix.latitude)));
    metadata.set_tag(ExifTag::GPSLongitudeRef(
        if fix.longitude >= 0.0 { "E" } else { "W" }.to_string(),
    ));
    metadata.set_tag(ExifTag::GPSLongitude(degrees_to_dms(fix.longitude)));

    if let Some(altitude) = fix.altitude_m {
        metadata.set_tag(ExifTag::GPSAltitudeRef(vec![u8::from(altitude < 0.0)]));
        metadata.set_tag(ExifTag::GPSAltitude(vec![uR64 {
            nominator: (altitude.abs() * 100.0).round() as u32,
            denominator: 100,
        }]));
    }

    if let Some(speed) = fix.speed_mps {
        // Stored in km/h
        metadata.set_tag(ExifTag::GPSSpeedRef("K".to_string()));
        metadata.set_tag(ExifTag::GPSSpeed(vec![uR64 {
            nominator: (speed.max(0.0) * 3.6 * 100.0).round() as u32,
            denominator: 100,
        }]));
    }

    if let Some(course) = fix.course_deg {
        // True-north heading
        metadata.set_tag(ExifTag::GPSTrackRef("T".to_string()));
        metadata.set_tag(ExifTag::GPSTrack(vec![uR64 {
            nominator: (course.rem_euclid(360.0) * 100.0).round() as u32,
            denominator: 100,
        }]));
    }

    let time = fix.timestamp.time();
    let micros = time.nanosecond() / 1_000;
    metadata.set_tag(ExifTag::GPSTimeStamp(vec![
        uR64 {
            nominator: time.hour(),
            denominator: 1,
        },
        uR64 {
            nominator: time.minute(),
            denominator: 1,
        },
        uR64 {
            nominator: time.second() * 1_000_000 + micros,
            denominator: 1_000_000,
        },
    ]));
    metadata.set_tag(ExifTag::GPSDateStamp(
        fix.timestamp.format("%Y:%m:%d").to_string(),
    ));

    metadata
        .write_to_file(path)
        .map_err(|e| CamError::Metadata(e.to_string()))?;
    Ok(())
}
