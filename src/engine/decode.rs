use crate::utils;

// CHARS for Chinese license plate
pub const CHARS: [&str; 83] = ["京", "沪", "津", "渝", "冀", "晋", "蒙", "辽", "吉", "黑", "苏", "浙", "皖", "闽", "赣", "鲁", "豫", "鄂", "湘", "粤", "桂",
             "琼", "川", "贵", "云", "藏", "陕", "甘", "青", "宁", "新", "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "A",
             "B", "C", "D", "E", "F", "G", "H", "J", "K", "L", "M", "N", "P", "Q", "R", "S", "T", "U", "V", "W", "X",
             "Y", "Z","港","学","使","警","澳","挂","军","北","南","广","沈","兰","成","济","海","民","航","空"
             ];

/// OCR graph output: 18 time steps over the 83 symbols plus the blank.
pub const OCR_SHAPE: [usize; 2] = [18, 84];

/// Greedy decoding of the OCR output. Step 0 is skipped, blanks and
/// repeated symbols collapse. The confidence is the mean probability of the
/// emitted symbols, 0.0 when nothing is emitted.
pub fn fast_decode(ocr_res: &[f32], shape: [usize; 2]) -> (String, f32) {
    let argmax = utils::argmax_in_axis0(ocr_res, &shape);
    let (res, confidence) = argmax.iter().enumerate().skip(1).filter(|(i, v)| {
        **v < CHARS.len() && **v != argmax[i-1]
    }).fold((Vec::new(), 0.0f32), |(mut res, mut confidence), (i, v)| {
        res.push(CHARS[*v]);
        confidence += ocr_res[i*shape[1] + v];
        (res, confidence)
    });
    if res.is_empty() {
        return (String::new(), 0.0);
    }
    let confidence = (confidence / res.len() as f32).clamp(0.0, 1.0);
    (res.join(""), confidence)
}
