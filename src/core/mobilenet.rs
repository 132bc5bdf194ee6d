//! MobileNet v2 feature model on libtorch.
//!
//! The network mirrors torchvision's layout (`features.N...` variable
//! names), so a VarStore exported from the torchvision checkpoint loads
//! directly. Only the feature trunk is built; the classifier weights in the
//! checkpoint are ignored. The output is the global-average-pooled
//! activation of the last 1x1 convolution.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tch::nn::{self, ModuleT};
use tch::{Kind, Tensor};

use crate::core::backend::ActiveBackend;
use crate::core::loader::DecodedImage;
use crate::core::model::{FeatureModel, ModelLoader, WIDTH_MULTIPLIER};
use crate::core::preprocess::{to_normalized_chw, INPUT_SIZE};
use crate::core::weights::{self, WeightsLocation};
use crate::error::{AppError, Result};

// (expansion, output channels, repeats, first stride)
const INVERTED_RESIDUAL_SETTINGS: [(i64, i64, i64, i64); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

/// Round `v` to the nearest multiple of 8 without dropping more than 10%.
fn make_divisible(v: f64) -> i64 {
    let divisor = 8i64;
    let rounded = ((v + divisor as f64 / 2.0) as i64 / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * v {
        rounded + divisor
    } else {
        rounded
    }
}

fn conv_bn_relu(p: nn::Path<'_>, c_in: i64, c_out: i64, ksize: i64, stride: i64, groups: i64) -> nn::SequentialT {
    let config = nn::ConvConfig {
        stride,
        padding: (ksize - 1) / 2,
        groups,
        bias: false,
        ..Default::default()
    };
    nn::seq_t()
        .add(nn::conv2d(&p / 0, c_in, c_out, ksize, config))
        .add(nn::batch_norm2d(&p / 1, c_out, Default::default()))
        .add_fn(|xs| xs.clamp(0.0, 6.0))
}

fn inverted_residual(p: nn::Path<'_>, c_in: i64, c_out: i64, stride: i64, expansion: i64) -> impl ModuleT {
    let p = &p / "conv";
    let c_hidden = c_in * expansion;
    let mut conv = nn::seq_t();
    let mut id = 0;

    if expansion != 1 {
        conv = conv.add(conv_bn_relu(&p / id, c_in, c_hidden, 1, 1, 1));
        id += 1;
    }
    let pointwise = nn::ConvConfig {
        bias: false,
        ..Default::default()
    };
    conv = conv
        .add(conv_bn_relu(&p / id, c_hidden, c_hidden, 3, stride, c_hidden))
        .add(nn::conv2d(&p / (id + 1), c_hidden, c_out, 1, pointwise))
        .add(nn::batch_norm2d(&p / (id + 2), c_out, Default::default()));

    let residual = stride == 1 && c_in == c_out;
    nn::func_t(move |xs, train| {
        let ys = xs.apply_t(&conv, train);
        if residual {
            xs + ys
        } else {
            ys
        }
    })
}

/// Feature trunk with the given width multiplier. Returns the network and
/// its output channel count.
fn feature_trunk(p: &nn::Path<'_>, alpha: f64) -> (nn::SequentialT, i64) {
    let f = p / "features";
    let mut c_in = make_divisible(32.0 * alpha);
    let c_last = make_divisible(1280.0 * alpha.max(1.0));

    let mut layer = 0;
    let mut net = nn::seq_t().add(conv_bn_relu(&f / layer, 3, c_in, 3, 2, 1));
    layer += 1;

    for &(expansion, channels, repeats, stride) in INVERTED_RESIDUAL_SETTINGS.iter() {
        let c_out = make_divisible(channels as f64 * alpha);
        for i in 0..repeats {
            let stride = if i == 0 { stride } else { 1 };
            net = net.add(inverted_residual(&f / layer, c_in, c_out, stride, expansion));
            c_in = c_out;
            layer += 1;
        }
    }

    net = net
        .add(conv_bn_relu(&f / layer, c_in, c_last, 1, 1, 1))
        .add_fn(|xs| xs.adaptive_avg_pool2d(&[1, 1]).flatten(1, -1));
    (net, c_last)
}

/// A loaded MobileNet v2 trunk.
pub struct MobileNetModel {
    net: Mutex<nn::SequentialT>,
    device: tch::Device,
    dimension: i64,
    _vs: nn::VarStore,
}

impl std::fmt::Debug for MobileNetModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobileNetModel")
            .field("device", &self.device)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl FeatureModel for MobileNetModel {
    fn name(&self) -> &str {
        "mobilenet_v2"
    }

    fn infer(&self, image: &DecodedImage) -> anyhow::Result<Vec<f32>> {
        let data = to_normalized_chw(image.image());
        let side = INPUT_SIZE as i64;
        let input = Tensor::of_slice(&data)
            .view([1, 3, side, side])
            .to_kind(Kind::Float)
            .to_device(self.device);

        let net = self
            .net
            .lock()
            .map_err(|_| anyhow::anyhow!("model lock poisoned"))?;
        let output = tch::no_grad(|| net.forward_t(&input, false));
        let output = output.to_device(tch::Device::Cpu).flatten(0, -1);

        if output.size1()? != self.dimension {
            anyhow::bail!("unexpected activation size {:?}", output.size());
        }
        Ok(Vec::<f32>::try_from(&output)?)
    }
}

/// Builds [`MobileNetModel`]s from a weights file or URL.
#[derive(Debug, Clone)]
pub struct MobileNetLoader {
    weights: WeightsLocation,
    cache_dir: PathBuf,
    http: reqwest::Client,
}

impl MobileNetLoader {
    /// Create a loader; nothing is fetched until [`ModelLoader::load`].
    pub fn new(weights: WeightsLocation, cache_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { weights, cache_dir, http })
    }
}

#[async_trait]
impl ModelLoader for MobileNetLoader {
    async fn load(&self, backend: &ActiveBackend) -> Result<Arc<dyn FeatureModel>> {
        let path = weights::resolve(&self.weights, &self.cache_dir, &self.http).await?;
        let device: tch::Device = backend.device.into();

        let model = tokio::task::spawn_blocking(move || -> Result<MobileNetModel> {
            let mut vs = nn::VarStore::new(device);
            let (net, dimension) = feature_trunk(&vs.root(), WIDTH_MULTIPLIER);
            vs.load(&path)?;
            vs.freeze();
            Ok(MobileNetModel {
                net: Mutex::new(net),
                device,
                dimension,
                _vs: vs,
            })
        })
        .await
        .map_err(|e| AppError::ModelLoad(format!("model loading aborted: {}", e)))??;

        log::info!("MobileNet v2 loaded, {}-d embeddings", model.dimension);
        Ok(Arc::new(model))
    }
}
