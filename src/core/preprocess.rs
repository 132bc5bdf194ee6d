use image::{imageops::FilterType, DynamicImage};

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

/// ImageNet channel means (RGB).
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB).
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize to `INPUT_SIZE`², drop alpha and lay the pixels out as
/// normalized planar CHW floats.
pub fn to_normalized_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (f32::from(pixel[c]) / 255.0 - MEAN[c]) / STD[c];
        }
    }

    data
}
