//! Deterministic stand-ins for the libtorch model.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use imagematch::{
    ActiveBackend, AppError, BackendCandidate, DecodedImage, Device, FeatureModel, ModelLoader,
    Result, SimilarityEngine,
};

const GRID: u32 = 4;

/// Mean RGB of each cell of a 4x4 grid, scaled to [0, 1].
#[derive(Debug, Default)]
pub struct GridMeanModel {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Option<Duration>,
}

impl FeatureModel for GridMeanModel {
    fn name(&self) -> &str {
        "grid-mean"
    }

    fn infer(&self, image: &DecodedImage) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let small = image
            .image()
            .resize_exact(GRID, GRID, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let values = small
            .pixels()
            .flat_map(|p| p.0)
            .map(|c| f32::from(c) / 255.0)
            .collect();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(values)
    }
}

/// Hands out one shared model, optionally failing the first `failures` loads.
pub struct TestLoader {
    pub model: Arc<GridMeanModel>,
    pub failures: AtomicUsize,
    pub loads: AtomicUsize,
}

impl TestLoader {
    pub fn new(model: GridMeanModel) -> Arc<Self> {
        Self::failing(model, 0)
    }

    pub fn failing(model: GridMeanModel, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            model: Arc::new(model),
            failures: AtomicUsize::new(failures),
            loads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModelLoader for TestLoader {
    async fn load(&self, _backend: &ActiveBackend) -> Result<Arc<dyn FeatureModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::ModelLoad("simulated network fault".to_string()));
        }
        Ok(self.model.clone())
    }
}

/// A model that fails on images narrower than `min_width`.
#[derive(Debug)]
pub struct PickyModel {
    pub min_width: u32,
}

impl FeatureModel for PickyModel {
    fn name(&self) -> &str {
        "picky"
    }

    fn infer(&self, image: &DecodedImage) -> anyhow::Result<Vec<f32>> {
        if image.width() < self.min_width {
            anyhow::bail!("input too small: {}px", image.width());
        }
        Ok(vec![1.0; 8])
    }
}

/// Loader that always returns the given model.
pub struct FixedLoader(pub Arc<dyn FeatureModel>);

#[async_trait]
impl ModelLoader for FixedLoader {
    async fn load(&self, _backend: &ActiveBackend) -> Result<Arc<dyn FeatureModel>> {
        Ok(self.0.clone())
    }
}

pub fn cpu_backend() -> BackendCandidate {
    BackendCandidate::new("cpu", || Ok(Device::Cpu))
}

pub fn engine_with(loader: Arc<dyn ModelLoader>) -> SimilarityEngine {
    SimilarityEngine::builder()
        .backends(vec![cpu_backend()])
        .model_loader(loader)
        .build()
        .unwrap()
}

pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_png(RgbImage::from_pixel(width, height, Rgb(color)))
}

pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    encode_png(img)
}

pub fn encode_png(img: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn data_uri(png: &[u8]) -> String {
    use base64::Engine as _;
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}
