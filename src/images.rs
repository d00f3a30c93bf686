use std::fs::{self, File};
use std::io::BufWriter;
use std::time::Instant;

use camino::Utf8Path;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::ImageError;
use crate::globset::GlobSet;
use crate::io::as_overhead;
use crate::registry::TaskContext;

/// Sidecar stored next to each cached artifact so a cache hit can report
/// its savings without decoding anything.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    width: u32,
    height: u32,
    bytes_in: u64,
    bytes_out: u64,
}

/// Losslessly re-encode everything under `images_temp/` into the permanent
/// `images/` directory. Outputs land next to the sources on purpose, not in
/// `dist/` like every other minify task.
///
/// Re-encoding is keyed by a blake3 hash of the source bytes: an input seen
/// before is served from `.cache/images/` without touching a codec. GIFs and
/// formats we cannot re-encode losslessly are copied through unchanged.
pub fn minify(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let paths = ctx.paths;

    let sources = GlobSet::single(&format!("{}/**/*", paths.images_temp))?.walk()?;
    if sources.is_empty() {
        tracing::info!("nothing under {}", paths.images_temp);
        return Ok(());
    }

    fs::create_dir_all(&paths.images)?;
    fs::create_dir_all(&paths.cache)?;

    let bar = ProgressBar::new(sources.len() as u64).with_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("Error setting progress bar template")
            .progress_chars("#>-"),
    );
    bar.set_message("Optimizing images...");

    let sizes = sources
        .par_iter()
        .progress_with(bar.clone())
        .map(|source| process_one(ctx.paths, source))
        .collect::<Result<Vec<_>, ImageError>>()?;

    bar.finish_and_clear();

    let bytes_in: u64 = sizes.iter().map(|(i, _)| i).sum();
    let bytes_out: u64 = sizes.iter().map(|(_, o)| o).sum();
    tracing::info!(
        "optimized {} image(s), {bytes_in} -> {bytes_out} bytes {}",
        sizes.len(),
        as_overhead(s)
    );

    ctx.signal_reload();
    Ok(())
}

fn process_one(paths: &crate::config::Paths, source: &Utf8Path) -> Result<(u64, u64), ImageError> {
    let relative = source
        .strip_prefix(&paths.images_temp)
        .unwrap_or_else(|_| Utf8Path::new(source.file_name().unwrap_or("image")));
    let dest = paths.images.join(relative);

    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir)?;
    }

    let data = fs::read(source)?;
    let bytes_in = data.len() as u64;

    // Anything we can't re-encode losslessly is copied through untouched.
    let format = match image::guess_format(&data) {
        Ok(format @ (ImageFormat::Png | ImageFormat::WebP)) => format,
        _ => {
            fs::write(&dest, &data)?;
            return Ok((bytes_in, bytes_in));
        }
    };

    let hash = blake3::hash(&data).to_hex();
    let ext = match format {
        ImageFormat::Png => "png",
        _ => "webp",
    };
    let path_cache = paths.cache.join(format!("{hash}.{ext}"));
    let path_meta = paths.cache.join(format!("{hash}.meta.cbor"));

    // Fast path, the exact bytes were optimized on an earlier run.
    if path_cache.exists() {
        link_or_copy(&path_cache, &dest)?;
        let bytes_out = match File::open(&path_meta)
            .ok()
            .and_then(|f| ciborium::from_reader::<CacheMeta, _>(f).ok())
        {
            Some(meta) => meta.bytes_out,
            None => fs::metadata(&path_cache)?.len(),
        };
        return Ok((bytes_in, bytes_out));
    }

    // Slow path, decode and re-encode.
    let img = image::load_from_memory(&data)?;
    let (width, height) = (img.width(), img.height());
    let rgba = img.to_rgba8();

    {
        let file = File::create(&path_cache)?;
        let mut writer = BufWriter::new(file);

        match format {
            ImageFormat::Png => {
                PngEncoder::new_with_quality(
                    &mut writer,
                    CompressionType::Best,
                    FilterType::Adaptive,
                )
                .write_image(&rgba, width, height, ExtendedColorType::Rgba8)?;
            }
            _ => {
                WebPEncoder::new_lossless(&mut writer).write_image(
                    &rgba,
                    width,
                    height,
                    ExtendedColorType::Rgba8,
                )?;
            }
        }
    }

    let bytes_out = fs::metadata(&path_cache)?.len();
    let meta = CacheMeta {
        width,
        height,
        bytes_in,
        bytes_out,
    };
    let meta_file = File::create(&path_meta)?;
    ciborium::into_writer(&meta, meta_file).map_err(std::io::Error::other)?;

    link_or_copy(&path_cache, &dest)?;
    Ok((bytes_in, bytes_out))
}

/// Hard link with fallback to copy, also replacing a stale destination.
fn link_or_copy(from: &Utf8Path, to: &Utf8Path) -> std::io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    if fs::hard_link(from, to).is_err() {
        fs::copy(from, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use camino::Utf8PathBuf;
    use image::{Rgba, RgbaImage};

    fn scratch(tag: &str) -> Utf8PathBuf {
        let dir = std::env::temp_dir().join(format!("sensu-images-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Utf8PathBuf::try_from(dir).unwrap()
    }

    fn sample_png(path: &Utf8Path) {
        let mut img = RgbaImage::new(8, 8);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([120, 30, 200, 255]);
        }
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_png_is_reencoded_and_cached() {
        let root = scratch("cache");
        let paths = Paths::rooted(&root);

        fs::create_dir_all(&paths.images_temp).unwrap();
        fs::create_dir_all(&paths.images).unwrap();
        fs::create_dir_all(&paths.cache).unwrap();
        sample_png(&paths.images_temp.join("dot.png"));

        let (in1, out1) = process_one(&paths, &paths.images_temp.join("dot.png")).unwrap();
        assert!(paths.images.join("dot.png").exists());
        assert_eq!(fs::read_dir(&paths.cache).unwrap().count(), 2); // artifact + meta

        // second run hits the cache and reports the same sizes
        let (in2, out2) = process_one(&paths, &paths.images_temp.join("dot.png")).unwrap();
        assert_eq!((in1, out1), (in2, out2));
        assert_eq!(fs::read_dir(&paths.cache).unwrap().count(), 2);
    }

    #[test]
    fn test_unknown_format_is_copied_through() {
        let root = scratch("copy");
        let paths = Paths::rooted(&root);

        fs::create_dir_all(&paths.images_temp).unwrap();
        fs::create_dir_all(&paths.images).unwrap();
        fs::create_dir_all(&paths.cache).unwrap();
        fs::write(paths.images_temp.join("notes.txt"), "not an image").unwrap();

        let (bytes_in, bytes_out) =
            process_one(&paths, &paths.images_temp.join("notes.txt")).unwrap();
        assert_eq!(bytes_in, bytes_out);
        assert_eq!(
            fs::read(paths.images.join("notes.txt")).unwrap(),
            b"not an image"
        );
    }
}
