use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sft::keypoints::{
    BruteForceMatcher, CovariancePrior, Descriptors, MixtureParams, OutlierRejectionParams,
    StabilityParams,
};
use sft::synthetic::{QuadraticSurface, SceneParams, SyntheticScene};
use sft::{
    CameraIntrinsics, FeatureExtractor, Features, GrayImage, GrayImageView, HomographyEstimator,
    IsometricParams, Keypoint, KeypointError, PipelineError, PipelineParams, ShapeFromTemplate,
};
use sft::core::Homography;
use sft::io::gray_view;

const TEMPLATE_WIDTH: usize = 200;
const IMAGE_WIDTH: usize = 640;
const DESCRIPTOR_LEN: usize = 64;

/// Template features for template-sized images (and their rendered views),
/// image features for anything as wide as the camera image.
struct SceneExtractor {
    template: Features,
    image: Features,
}

impl FeatureExtractor for SceneExtractor {
    fn detect_and_compute(&self, image: &GrayImageView<'_>) -> Result<Features, KeypointError> {
        Ok(if image.width == IMAGE_WIDTH {
            self.image.clone()
        } else {
            self.template.clone()
        })
    }
}

struct EvenInliers;

impl HomographyEstimator for EvenInliers {
    fn find_homography(
        &self,
        src: &[Point2<f32>],
        _dst: &[Point2<f32>],
        _threshold: f64,
    ) -> Option<(Homography, Vec<bool>)> {
        Some((Homography::identity(), (0..src.len()).map(|i| i % 2 == 0).collect()))
    }
}

fn descriptor(i: usize) -> Vec<f32> {
    (0..DESCRIPTOR_LEN)
        .map(|j| if j == i % DESCRIPTOR_LEN { 10.0 } else { 0.0 })
        .collect()
}

fn camera() -> CameraIntrinsics {
    CameraIntrinsics {
        fx: 500.0,
        fy: 500.0,
        cx: 320.0,
        cy: 240.0,
    }
}

/// Template keypoints at `10 · (parameter + 15)` pixels; image keypoints at
/// the projections, listed in reverse order.
fn scene_extractor(scene: &SyntheticScene) -> SceneExtractor {
    let n = scene.control.len();
    let template_kps: Vec<Keypoint> = scene
        .control
        .iter()
        .map(|&i| {
            let p = scene.parameters[i];
            Keypoint::new((10.0 * (p.x + 15.0)) as f32, (10.0 * (p.y + 15.0)) as f32, 8.0, 0.0)
        })
        .collect();
    let image_kps: Vec<Keypoint> = scene
        .control
        .iter()
        .rev()
        .map(|&i| {
            let q = scene.image_points[i];
            Keypoint::new((q.x + 320.0) as f32, (q.y + 240.0) as f32, 8.0, 0.0)
        })
        .collect();
    let template_desc: Vec<Vec<f32>> = (0..n).map(descriptor).collect();
    let image_desc: Vec<Vec<f32>> = (0..n).rev().map(descriptor).collect();

    SceneExtractor {
        template: Features::new(template_kps, Descriptors::from_rows(&template_desc).unwrap())
            .unwrap(),
        image: Features::new(image_kps, Descriptors::from_rows(&image_desc).unwrap()).unwrap(),
    }
}

fn params() -> PipelineParams {
    PipelineParams {
        outlier_rejection: None,
        template_scale: 0.1,
        camera: camera(),
        isometric: IsometricParams {
            step: 0.25,
            ..IsometricParams::default()
        },
        ..PipelineParams::default()
    }
}

/// The template in the workspace's own image type, the camera frame as it
/// would arrive from the `image` crate.
fn images() -> (GrayImage, ::image::GrayImage) {
    (
        GrayImage::from_fn(TEMPLATE_WIDTH, 150, |x, y| ((x + 2 * y) % 256) as u8),
        ::image::GrayImage::new(IMAGE_WIDTH as u32, 480),
    )
}

fn depth_errors(scene: &SyntheticScene, out: &sft::Reconstruction) -> Vec<f64> {
    out.surface
        .samples()
        .iter()
        .map(|s| {
            // Matches are resolved in template order, so sample rows follow the controls.
            let truth = scene.surface_points[scene.control[s.index]];
            (s.scale - truth.z).abs() / truth.z
        })
        .collect()
}

#[test]
fn recovers_depth_from_matched_keypoints() {
    let scene = SyntheticScene::generate(SceneParams::default(), &mut StdRng::seed_from_u64(5))
        .unwrap();
    let extractor = scene_extractor(&scene);
    let pipeline = ShapeFromTemplate::new(&extractor, &BruteForceMatcher, &EvenInliers, params());
    let (template, image) = images();

    let out = pipeline
        .reconstruct(&template.view(), &gray_view(&image), &mut StdRng::seed_from_u64(9))
        .unwrap();

    let n = scene.control.len();
    assert_eq!(out.matches.len(), n);
    assert!(out.matches.iter().all(|m| m.train == n - 1 - m.query));
    assert!(out.selection.is_none());
    assert!(out.outliers.is_none());
    assert_eq!(out.image_warp.matches().len(), n);

    let errors = depth_errors(&scene, &out);
    assert!(errors.len() >= n - 2);
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    assert!(mean < 0.05, "mean relative depth error {mean}");
    assert!(errors.iter().all(|&e| e < 0.15));
}

#[test]
fn stability_selection_thins_the_template() {
    let scene = SyntheticScene::generate(SceneParams::default(), &mut StdRng::seed_from_u64(5))
        .unwrap();
    let extractor = scene_extractor(&scene);
    let params = PipelineParams {
        stability: Some(StabilityParams {
            angle_sigma: 0.0,
            ..StabilityParams::default()
        }),
        ..params()
    };
    let pipeline = ShapeFromTemplate::new(&extractor, &BruteForceMatcher, &EvenInliers, params);
    let (template, image) = images();

    let out = pipeline
        .reconstruct(&template.view(), &gray_view(&image), &mut StdRng::seed_from_u64(9))
        .unwrap();
    let selection = out.selection.as_ref().unwrap();
    assert_eq!(selection.scores.len(), scene.control.len());
    assert_eq!(out.template_features.len(), scene.control.len().div_ceil(2));
    assert_eq!(out.matches.len(), out.template_features.len());
}

#[test]
fn ambiguous_descriptors_stop_the_pipeline() {
    let scene = SyntheticScene::generate(SceneParams::default(), &mut StdRng::seed_from_u64(5))
        .unwrap();
    let mut extractor = scene_extractor(&scene);
    let n = extractor.image.len();
    extractor.image.descriptors =
        Descriptors::from_rows(&vec![vec![1.0; DESCRIPTOR_LEN]; n]).unwrap();

    let pipeline = ShapeFromTemplate::new(&extractor, &BruteForceMatcher, &EvenInliers, params());
    let (template, image) = images();
    let err = pipeline
        .reconstruct(&template.view(), &gray_view(&image), &mut StdRng::seed_from_u64(9))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NotEnoughMatches {
            stage: "ratio test",
            got: 0,
            ..
        }
    ));
}

/// A shallow scene whose template is drawn at the camera's scale, so every
/// correct match moves its keypoint by a few pixels at most.
fn shallow_scene() -> SyntheticScene {
    let params = SceneParams {
        surface: QuadraticSurface {
            coef: 0.002,
            constant: 12.0,
        },
        ..SceneParams::default()
    };
    SyntheticScene::generate(params, &mut StdRng::seed_from_u64(5)).unwrap()
}

const SHALLOW_PIXELS_PER_UNIT: f64 = 500.0 / 12.0;

/// Template and image keypoints in control order. `wrong_match` appends one
/// more pair with unique descriptors whose keypoints disagree by hundreds of
/// pixels.
fn aligned_extractor(scene: &SyntheticScene, wrong_match: bool) -> SceneExtractor {
    let mut template_kps: Vec<Keypoint> = scene
        .control
        .iter()
        .map(|&i| {
            let p = scene.parameters[i] * SHALLOW_PIXELS_PER_UNIT;
            Keypoint::new((p.x + 320.0) as f32, (p.y + 240.0) as f32, 8.0, 0.0)
        })
        .collect();
    let mut image_kps: Vec<Keypoint> = scene
        .control
        .iter()
        .map(|&i| {
            let q = scene.image_points[i];
            Keypoint::new((q.x + 320.0) as f32, (q.y + 240.0) as f32, 8.0, 0.0)
        })
        .collect();
    if wrong_match {
        template_kps.push(Keypoint::new(320.0, 240.0, 8.0, 0.0));
        image_kps.push(Keypoint::new(20.0, 440.0, 8.0, 0.0));
    }
    let desc: Vec<Vec<f32>> = (0..template_kps.len()).map(descriptor).collect();

    SceneExtractor {
        template: Features::new(template_kps, Descriptors::from_rows(&desc).unwrap()).unwrap(),
        image: Features::new(image_kps, Descriptors::from_rows(&desc).unwrap()).unwrap(),
    }
}

fn gor_params() -> PipelineParams {
    PipelineParams {
        outlier_rejection: Some(OutlierRejectionParams {
            determinant_threshold: 1.0,
            mixture: MixtureParams {
                covariance_prior: CovariancePrior::Isotropic(1.0),
                ..MixtureParams::default()
            },
            ..OutlierRejectionParams::default()
        }),
        template_scale: 1.0 / SHALLOW_PIXELS_PER_UNIT,
        ..params()
    }
}

#[test]
fn outlier_rejection_keeps_a_consistent_scene() {
    let scene = shallow_scene();
    let extractor = aligned_extractor(&scene, false);
    let pipeline = ShapeFromTemplate::new(&extractor, &BruteForceMatcher, &EvenInliers, gor_params());
    let (template, image) = images();

    let out = pipeline
        .reconstruct(&template.view(), &gray_view(&image), &mut StdRng::seed_from_u64(9))
        .unwrap();

    let n = scene.control.len();
    let gor = out.outliers.as_ref().unwrap();
    assert_eq!(out.matches.len(), n);
    assert_eq!(gor.mask, vec![true; n]);
    assert_eq!(gor.inliers, out.matches);
    assert_eq!(out.image_warp.matches().len(), n);
}

#[test]
fn outlier_rejection_drops_a_wrong_match() {
    let scene = shallow_scene();
    let extractor = aligned_extractor(&scene, true);
    let pipeline = ShapeFromTemplate::new(&extractor, &BruteForceMatcher, &EvenInliers, gor_params());
    let (template, image) = images();

    let out = pipeline
        .reconstruct(&template.view(), &gray_view(&image), &mut StdRng::seed_from_u64(9))
        .unwrap();

    let n = scene.control.len();
    assert_eq!(out.matches.len(), n + 1);
    let gor = out.outliers.as_ref().unwrap();
    assert_eq!(gor.mask, [vec![true; n], vec![false]].concat());
    assert!(gor.determinants[n] > 1.0);
    assert!(out.image_warp.matches().iter().all(|m| m.query < n));

    let errors = depth_errors(&scene, &out);
    assert!(errors.len() >= n - 2);
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    assert!(mean < 0.05, "mean relative depth error {mean}");
    assert!(errors.iter().all(|&e| e < 0.15));
}
