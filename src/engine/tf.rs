use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor, TensorType};
use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use imageproc::{contrast, filter};
use tracing::{debug, info, trace};

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{GraphConfig, LprConfig};
use crate::engine::decode::{self, OCR_SHAPE};
use crate::engine::PlateEngine;
use crate::error::LprError;
use crate::plate::{PlateCandidate, PlateType};
use crate::utils;

const FINE_MAPPING_SIZE: (u32, u32) = (66, 16);
const OCR_SIZE: (u32, u32) = (48, 164);

/// Detection, vertical fine mapping and OCR over three frozen graphs.
pub struct TfPlateEngine {
    detection: GraphSession,
    fine_mapping: GraphSession,
    ocr: GraphSession,
    config: LprConfig,
}

impl TfPlateEngine {

    pub fn new(model_dir: impl AsRef<Path>, config: LprConfig) -> Result<Self, LprError> {
        let model_dir = model_dir.as_ref();
        config.validate().map_err(|reason| LprError::model_load(model_dir, reason))?;
        let detection = GraphSession::load(model_dir, &config.detection)?;
        let fine_mapping = GraphSession::load(model_dir, &config.fine_mapping)?;
        let ocr = GraphSession::load(model_dir, &config.ocr)?;
        info!("loaded plate graphs from {}", model_dir.display());
        Ok(Self { detection, fine_mapping, ocr, config })
    }

    /// get boxes and scores
    /// box here is in a format of x,y,width,height
    pub fn get_boxes_and_scores(&self, img: &RgbImage) -> Result<Vec<([u32; 4], f32)>, LprError> {
        let (width, height) = img.dimensions();
        let img_tensor = Tensor::<u8>::new(&[1, height as u64, width as u64, 3]).with_values(img.as_raw())?;

        // box ymin xmin ymax xmax normalize 1
        let mut outputs = self.detection.run(&img_tensor)?;
        let scores = outputs.pop().ok_or_else(|| LprError::engine("detection returned no scores"))?;
        let boxes = outputs.pop().ok_or_else(|| LprError::engine("detection returned no boxes"))?;

        let score_needed = self.config.detect_threshold;
        let detect_res = boxes.chunks_exact(4).zip(scores.iter()).filter(|(_, score)| {
            **score > score_needed
        }).filter_map(|(v, score)| {
            let ymin = (v[0].clamp(0.0, 1.0) * height as f32) as u32;
            let xmin = (v[1].clamp(0.0, 1.0) * width as f32) as u32;
            let ymax = (v[2].clamp(0.0, 1.0) * height as f32) as u32;
            let xmax = (v[3].clamp(0.0, 1.0) * width as f32) as u32;
            let a_box = [xmin, ymin, xmax.saturating_sub(xmin), ymax.saturating_sub(ymin)];
            utils::clamp_box(a_box, (width, height)).map(|b| (b, *score))
        }).collect();
        Ok(detect_res)
    }

    pub fn get_ocr_result(&self, plate: &RgbImage) -> Result<(String, f32), LprError> {
        let img = utils::equalize_hist_in_gray(&DynamicImage::ImageRgb8(plate.clone()));

        let img = utils::transpose(&img);
        let img = imageops::resize(&img, OCR_SIZE.0, OCR_SIZE.1, FilterType::Nearest);
        let mut img = filter::gaussian_blur_f32(&img, 1.4);
        contrast::equalize_histogram_mut(&mut img);
        let img = DynamicImage::ImageLuma8(img).to_rgb8();
        let img = utils::to_bgr_f32(&img, 1.0);
        let tensor_img = Tensor::<f32>::new(&[1, OCR_SIZE.1 as u64, OCR_SIZE.0 as u64, 3]).with_values(&img)?;

        let ocr_res = self.ocr.run_single(&tensor_img)?;
        if ocr_res.len() != OCR_SHAPE[0] * OCR_SHAPE[1] {
            return Err(LprError::engine(format!("ocr output has {} values, expected {:?}", ocr_res.len(), OCR_SHAPE)));
        }
        Ok(decode::fast_decode(&ocr_res, OCR_SHAPE))
    }

    /// Trim the plate horizontally to the character span and move the
    /// left edge of `rect` along with it.
    pub fn fine_mapping_vertical(&self, img: &RgbImage, rect: &mut [u32; 4]) -> Result<RgbImage, LprError> {
        let resized = imageops::resize(img, FINE_MAPPING_SIZE.0, FINE_MAPPING_SIZE.1, FilterType::Nearest);
        let resized = utils::to_bgr_f32(&resized, 1.0 / 255.0);

        let tensor = Tensor::<f32>::new(&[1, FINE_MAPPING_SIZE.1 as u64, FINE_MAPPING_SIZE.0 as u64, 3]).with_values(&resized)?;
        let res_raw = self.fine_mapping.run_single(&tensor)?;
        if res_raw.len() < 2 {
            return Err(LprError::engine("fine mapping returned fewer than two values"));
        }
        let (img_w, img_h) = img.dimensions();
        let left = (res_raw[0].clamp(0.0, 1.0) * img_w as f32) as u32;
        let right = (res_raw[1].clamp(0.0, 1.0) * img_w as f32) as u32;
        let h = left.saturating_sub(3);
        let t = (right + 2).min(img_w - 1);
        if t <= h {
            trace!("fine mapping collapsed the plate, keeping the detected box");
            return Ok(img.clone());
        }

        rect[0] += h;
        rect[2] = t - h;
        Ok(imageops::crop_imm(img, h, 0, t - h, img_h).to_image())
    }
}

impl PlateEngine for TfPlateEngine {
    fn name(&self) -> &str {
        "tensorflow"
    }

    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<PlateCandidate>, LprError> {
        let boxes_and_scores = self.get_boxes_and_scores(image)?;
        debug!("{} plate boxes above {}", boxes_and_scores.len(), self.config.detect_threshold);

        let mut candidates = Vec::with_capacity(boxes_and_scores.len());
        for (mut a_box, detection_score) in boxes_and_scores {
            let [x, y, width, height] = a_box;
            let plate = imageops::crop_imm(image, x, y, width, height).to_image();
            let plate = self.fine_mapping_vertical(&plate, &mut a_box)?;
            let (code, confidence) = self.get_ocr_result(&plate)?;
            if code.is_empty() || confidence < self.config.min_confidence {
                trace!("dropping box {:?}: {:?} at {}", a_box, code, confidence);
                continue;
            }
            let plate_type = PlateType::classify(&code, &plate);
            candidates.push(PlateCandidate { bbox: a_box, detection_score, code, plate_type, confidence });
        }
        Ok(candidates)
    }
}

/// One imported graph with its session and the node names it is run with.
pub struct GraphSession {
    graph: Graph,
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl GraphSession {

    pub fn load(model_dir: &Path, config: &GraphConfig) -> Result<Self, LprError> {
        let pb_file: PathBuf = model_dir.join(&config.file);
        let pb = fs::read(&pb_file).map_err(|e| LprError::model_load(&pb_file, e))?;
        // import graph def
        let mut graph = Graph::new();
        let graph_def_options = ImportGraphDefOptions::new();
        graph.import_graph_def(&pb, &graph_def_options).map_err(|e| LprError::model_load(&pb_file, e))?;
        // every node we feed or fetch has to exist before the first run
        for name in std::iter::once(&config.input).chain(config.outputs.iter()) {
            graph.operation_by_name_required(name).map_err(|e| LprError::model_load(&pb_file, e))?;
        }
        // new session
        let session_option = SessionOptions::new();
        let session = Session::new(&session_option, &graph).map_err(|e| LprError::model_load(&pb_file, e))?;
        debug!("imported {}", pb_file.display());
        Ok(Self { graph, session, input_name: config.input.clone(), output_names: config.outputs.clone() })
    }

    /// Feed `input` and fetch every configured output, in order.
    pub fn run<T: TensorType>(&self, input: &Tensor<T>) -> Result<Vec<Tensor<f32>>, LprError> {
        let mut args = SessionRunArgs::new();
        args.add_feed(&self.graph.operation_by_name_required(&self.input_name)?, 0, input);
        let mut tokens = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            tokens.push(args.request_fetch(&self.graph.operation_by_name_required(name)?, 0));
        }
        self.session.run(&mut args)?;
        tokens.into_iter().map(|token| -> Result<Tensor<f32>, LprError> {
            Ok(args.fetch(token)?)
        }).collect()
    }

    pub fn run_single<T: TensorType>(&self, input: &Tensor<T>) -> Result<Tensor<f32>, LprError> {
        self.run(input)?.pop().ok_or_else(|| LprError::engine("graph returned no output"))
    }
}
