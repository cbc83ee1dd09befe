use image::{DynamicImage, GrayImage, ImageBuffer, Pixel, RgbImage};

// tensor 的展开机制是先 y 再 x，每 shape[1] 个值为一行
pub fn argmax_in_axis0(input: &[f32], shape: &[usize]) -> Vec<usize> {
    input.chunks(shape[1]).map(|v: &[f32]| {
        let mut max = f32::MIN;
        let mut index = 0;
        v.iter().enumerate().for_each(|(i, v_in_v)| {
            if *v_in_v >= max {
                max = *v_in_v;
                index = i;
            }
        });
        index
    }).collect()
}

pub fn transpose<P: Pixel>(input: &ImageBuffer<P, Vec<P::Subpixel>>) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut output = ImageBuffer::new(input.height(), input.width());
    input.enumerate_pixels().for_each(|(x, y, pixel)| {
        output.put_pixel(y, x, *pixel);
    });
    output
}

pub fn equalize_hist_in_gray(img: &DynamicImage) -> GrayImage {
    let mut img = img.to_luma8();
    let len = img.len();
    if len == 0 {
        return img;
    }

    // 分布函数
    let mut df = [0usize; 256];
    for v in img.iter() {
        df[*v as usize] += 1;
    }
    // cdf
    let mut temp = df[0];
    df.iter_mut().skip(1).for_each(|v| {
        *v += temp;
        temp = *v;
    });
    let cdf_min = df.iter().copied().find(|v| *v != 0).unwrap_or(0);
    // 单色图像无法均衡
    if cdf_min == len {
        return img;
    }
    img.iter_mut().for_each(|v| {
        let x = df[*v as usize] - cdf_min;
        let y = len - cdf_min;
        *v = ((x as f32 / y as f32) * 255.0).round() as u8;
    });
    img
}

/// Interleaved BGR samples of an RGB image, the channel order the graphs
/// were trained with.
pub fn to_bgr_f32(img: &RgbImage, scale: f32) -> Vec<f32> {
    img.pixels().flat_map(|p| [p[2], p[1], p[0]]).map(|v| v as f32 * scale).collect()
}

/// Clamp an x, y, width, height box to the image. `None` when nothing is
/// left of it.
pub fn clamp_box([x, y, width, height]: [u32; 4], (img_w, img_h): (u32, u32)) -> Option<[u32; 4]> {
    if x >= img_w || y >= img_h {
        return None;
    }
    let width = width.min(img_w - x);
    let height = height.min(img_h - y);
    if width == 0 || height == 0 {
        return None;
    }
    Some([x, y, width, height])
}
