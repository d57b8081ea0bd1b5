//! End-to-end frames through [`CloudRenderer`].

use approx::assert_abs_diff_eq;
use glam::{Vec3, Vec4};
use image::{Rgba, Rgba32FImage};
use nimbus_core::{MarkerTransform, VolumeFn};
use nimbus_gpu::{Extent2d, FilterMode, PixelFormat, TargetId, TextureRef};
use nimbus_render::{
    BindingId, CameraRayBasis, CloudRenderer, CloudVolumeConfig, DownsampleFactor, FrameOutcome,
    FrameRequest, FrameTargets, PassStage, RenderError, SkipReason, LOW_COLOR_LABEL,
    LOW_DEPTH_LABEL,
};

use crate::recording::{Command, RecordingBackend};
use crate::scene::{host_frame, test_camera, SkyScene};
use crate::software::SoftwareBackend;
use crate::max_difference;

const HD: Extent2d = Extent2d::new(1280, 720);

fn cloud_marker() -> MarkerTransform {
    MarkerTransform::new(Vec3::new(0.0, 100.0, 0.0), Vec3::new(1000.0, 200.0, 1000.0))
}

fn config_with_factor(factor: u32) -> CloudVolumeConfig {
    CloudVolumeConfig {
        downsample: DownsampleFactor::new(factor).unwrap(),
        ..CloudVolumeConfig::default()
    }
}

fn render_recorded(
    backend: &mut RecordingBackend,
    marker: Option<MarkerTransform>,
    config: &CloudVolumeConfig,
    screen: Extent2d,
) -> Result<FrameOutcome, RenderError> {
    let camera = CameraRayBasis::from_camera(&test_camera(screen));
    let request = FrameRequest {
        config,
        camera: &camera,
        screen,
        targets: host_frame(screen),
    };
    CloudRenderer::new(marker).render(&request, &mut backend.services())
}

#[test]
fn end_to_end_pass_sequence() {
    let mut backend = RecordingBackend::new();
    let outcome = render_recorded(
        &mut backend,
        Some(cloud_marker()),
        &CloudVolumeConfig::default(),
        HD,
    )
    .unwrap();

    let low = Extent2d::new(320, 180);
    assert_eq!(outcome, FrameOutcome::Composited { scratch_extent: low });

    let depth = TargetId(1000);
    let color = TargetId(1001);
    assert_eq!(
        backend.commands(),
        vec![
            Command::Acquire {
                label: LOW_DEPTH_LABEL,
                id: depth,
                extent: low,
                format: PixelFormat::Rgba16Float,
                filter: FilterMode::Point,
            },
            Command::Acquire {
                label: LOW_COLOR_LABEL,
                id: color,
                extent: low,
                format: PixelFormat::Rgba16Float,
                filter: FilterMode::Trilinear,
            },
            Command::DownsampleDepth {
                source: TargetId(2),
                target: depth,
            },
            Command::Evaluate {
                depth,
                target: color,
            },
            Command::Composite {
                depth,
                clouds: color,
                destination: TargetId(3),
            },
            Command::Release(color),
            Command::Release(depth),
        ]
    );

    let inputs = backend.last_inputs().unwrap();
    assert_abs_diff_eq!(
        inputs.vector(BindingId::BoundsMin).unwrap(),
        Vec4::new(-500.0, 0.0, -500.0, 0.0),
        epsilon = 1e-4
    );
    assert_abs_diff_eq!(
        inputs.vector(BindingId::BoundsMax).unwrap(),
        Vec4::new(500.0, 200.0, 500.0, 0.0),
        epsilon = 1e-4
    );
}

#[test]
fn missing_marker_allocates_nothing() {
    let mut backend = RecordingBackend::new();
    let outcome =
        render_recorded(&mut backend, None, &CloudVolumeConfig::default(), HD).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::MissingVolumeMarker));
    assert_eq!(
        backend.commands(),
        vec![Command::Blit {
            source: TargetId(1),
            destination: TargetId(3),
        }]
    );
}

#[test]
fn degenerate_marker_is_treated_as_missing() {
    let mut backend = RecordingBackend::new();
    let flat = MarkerTransform::new(Vec3::ZERO, Vec3::new(100.0, 0.0, 100.0));
    let outcome =
        render_recorded(&mut backend, Some(flat), &CloudVolumeConfig::default(), HD).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::MissingVolumeMarker));
    assert_eq!(backend.acquire_count(), 0);
}

#[test]
fn every_pass_failure_releases_both_targets() {
    for (stage, passes) in PassStage::ORDER.into_iter().zip(1..) {
        let mut backend = RecordingBackend::new().fail_stage(stage);
        let result = render_recorded(
            &mut backend,
            Some(cloud_marker()),
            &CloudVolumeConfig::default(),
            HD,
        );

        assert!(
            matches!(result, Err(RenderError::Pass { stage: failed, .. }) if failed == stage),
            "{stage}"
        );
        assert_eq!(backend.pass_count(), passes, "{stage}");
        assert_eq!(backend.release_count(), 2, "{stage}");
        assert_eq!(backend.live_targets(), 0, "{stage}");

        let commands = backend.commands();
        assert!(
            matches!(
                commands[commands.len() - 3..],
                [
                    Command::Release(_),
                    Command::Release(_),
                    Command::Blit {
                        source: TargetId(1),
                        destination: TargetId(3),
                    },
                ]
            ),
            "{stage}: {commands:?}"
        );
    }
}

#[test]
fn allocation_failure_runs_no_pass() {
    for attempt in [0, 1] {
        let mut backend = RecordingBackend::new().fail_acquisition(attempt);
        let result = render_recorded(
            &mut backend,
            Some(cloud_marker()),
            &CloudVolumeConfig::default(),
            HD,
        );

        assert!(matches!(result, Err(RenderError::ScratchAllocation(_))));
        assert_eq!(backend.pass_count(), 0);
        assert_eq!(backend.release_count(), attempt);
        assert_eq!(backend.live_targets(), 0);
        assert_eq!(
            backend.commands().last(),
            Some(&Command::Blit {
                source: TargetId(1),
                destination: TargetId(3),
            })
        );
    }
}

#[test]
fn boundary_downsample_factors_give_valid_targets() {
    for factor in [DownsampleFactor::MIN, DownsampleFactor::MAX] {
        for screen in [
            Extent2d::new(16, 16),
            Extent2d::new(17, 23),
            Extent2d::new(1920, 1080),
        ] {
            let mut backend = RecordingBackend::new();
            let outcome = render_recorded(
                &mut backend,
                Some(cloud_marker()),
                &config_with_factor(factor),
                screen,
            )
            .unwrap();

            let FrameOutcome::Composited { scratch_extent } = outcome else {
                panic!("factor {factor} at {screen} was skipped");
            };
            assert!(!scratch_extent.is_empty(), "factor {factor} at {screen}");
            assert_eq!(backend.pass_count(), 3);
            assert_eq!(backend.release_count(), 2);
        }
    }
}

#[test]
fn unset_textures_are_absent_and_scalars_present() {
    let mut backend = RecordingBackend::new();
    let config = CloudVolumeConfig {
        shape_noise: Some(TextureRef::new_3d(1, 128, 128, 128)),
        blue_noise: Some(TextureRef::new_2d(2, 64, 64)),
        ..CloudVolumeConfig::default()
    };
    render_recorded(
        &mut backend,
        Some(cloud_marker()),
        &config,
        Extent2d::new(1920, 1080),
    )
    .unwrap();

    let inputs = backend.last_inputs().unwrap();
    assert!(!inputs.contains(BindingId::WeatherMap));
    assert!(!inputs.contains(BindingId::MaskNoise));
    assert!(inputs.contains(BindingId::ShapeNoise));
    assert_eq!(
        inputs.vector(BindingId::BlueNoiseCoords),
        Some(Vec4::new(30.0, 16.875, 0.0, 0.0))
    );
    assert_eq!(inputs.float(BindingId::Step), Some(config.step));
    assert_eq!(inputs.vector(BindingId::FlowWarp), Some(config.flow_warp));
}

#[test]
fn frames_do_not_leak_targets() {
    let mut backend = RecordingBackend::new().fail_stage(PassStage::Composite);
    let camera = CameraRayBasis::from_camera(&test_camera(HD));
    let config = CloudVolumeConfig::default();
    let request = FrameRequest {
        config: &config,
        camera: &camera,
        screen: HD,
        targets: host_frame(HD),
    };

    let mut renderer = CloudRenderer::new(cloud_marker());
    for _ in 0..4 {
        let _ = renderer.render(&request, &mut backend.services());
        assert_eq!(backend.live_targets(), 0);
    }
    assert_eq!(renderer.frames_rendered(), 4);
    assert_eq!(backend.acquire_count(), 8);
    assert_eq!(backend.release_count(), 8);
}

#[test]
fn marker_can_appear_between_frames() {
    let mut backend = RecordingBackend::new();
    let camera = CameraRayBasis::from_camera(&test_camera(HD));
    let config = CloudVolumeConfig::default();
    let request = FrameRequest {
        config: &config,
        camera: &camera,
        screen: HD,
        targets: host_frame(HD),
    };

    let mut renderer = CloudRenderer::new(None);
    assert_eq!(
        renderer.render(&request, &mut backend.services()).unwrap(),
        FrameOutcome::Skipped(SkipReason::MissingVolumeMarker)
    );

    *renderer.volume_mut() = Some(cloud_marker());
    assert!(matches!(
        renderer.render(&request, &mut backend.services()).unwrap(),
        FrameOutcome::Composited { .. }
    ));
}

struct SoftwareFrame {
    backend: SoftwareBackend,
    targets: FrameTargets,
    source: Rgba32FImage,
}

fn software_frame(extent: Extent2d, scene: SkyScene) -> SoftwareFrame {
    let mut backend = SoftwareBackend::new();
    let source = scene.color.clone();
    let targets = FrameTargets {
        source_color: backend.add_image(scene.color),
        source_depth: backend.add_image(scene.depth),
        destination: backend.add_image(Rgba32FImage::new(extent.width, extent.height)),
    };
    SoftwareFrame {
        backend,
        targets,
        source,
    }
}

fn render_software(
    frame: &mut SoftwareFrame,
    marker: Option<MarkerTransform>,
    config: &CloudVolumeConfig,
    extent: Extent2d,
) -> Rgba32FImage {
    let camera = CameraRayBasis::from_camera(&test_camera(extent));
    let request = FrameRequest {
        config,
        camera: &camera,
        screen: extent,
        targets: frame.targets,
    };
    CloudRenderer::new(marker)
        .render(&request, &mut frame.backend.services())
        .unwrap();
    assert_eq!(frame.backend.scratch_count(), 0);
    frame.backend.image(frame.targets.destination.id).unwrap()
}

#[test]
fn software_passthrough_is_identity() {
    let extent = Extent2d::new(64, 36);
    let mut frame = software_frame(extent, SkyScene::render(&test_camera(extent), extent));

    let output = render_software(&mut frame, None, &CloudVolumeConfig::default(), extent);
    assert_eq!(max_difference(&output, &frame.source).unwrap(), 0.0);

    let disabled = CloudVolumeConfig {
        enabled: false,
        ..CloudVolumeConfig::default()
    };
    let output = render_software(&mut frame, Some(cloud_marker()), &disabled, extent);
    assert_eq!(max_difference(&output, &frame.source).unwrap(), 0.0);
}

#[test]
fn software_clouds_cover_the_volume_only() {
    let extent = Extent2d::new(64, 36);
    let mut frame = software_frame(extent, SkyScene::render(&test_camera(extent), extent));
    let output = render_software(
        &mut frame,
        Some(cloud_marker()),
        &CloudVolumeConfig::default(),
        extent,
    );

    // Looking straight through the box changes the image.
    let centre = (extent.width / 2, extent.height / 2);
    let before = frame.source.get_pixel(centre.0, centre.1).0;
    let after = output.get_pixel(centre.0, centre.1).0;
    assert_ne!(before, after);

    // The ground in front of the box is closer than the clouds.
    let near_ground = (extent.width / 2, extent.height - 1);
    assert_eq!(
        output.get_pixel(near_ground.0, near_ground.1).0,
        frame.source.get_pixel(near_ground.0, near_ground.1).0
    );
}

#[test]
fn software_clouds_respect_scene_depth() {
    let extent = Extent2d::new(48, 27);
    let mut scene = SkyScene::render(&test_camera(extent), extent);
    // A wall one unit in front of the camera hides everything.
    for pixel in scene.depth.pixels_mut() {
        *pixel = Rgba([1.0, 1.0, 1.0, 1.0]);
    }
    let mut frame = software_frame(extent, scene);

    let output = render_software(
        &mut frame,
        Some(cloud_marker()),
        &CloudVolumeConfig::default(),
        extent,
    );
    assert_abs_diff_eq!(
        max_difference(&output, &frame.source).unwrap(),
        0.0,
        epsilon = 1e-6
    );
}

#[test]
fn software_evaluator_keeps_textures_between_frames() {
    let extent = Extent2d::new(32, 18);
    let mut frame = software_frame(extent, SkyScene::render(&test_camera(extent), extent));
    let weather = TextureRef::new_2d(11, 512, 512);

    let first = CloudVolumeConfig {
        weather_map: Some(weather),
        ..CloudVolumeConfig::default()
    };
    render_software(&mut frame, Some(cloud_marker()), &first, extent);
    render_software(
        &mut frame,
        Some(cloud_marker()),
        &CloudVolumeConfig::default(),
        extent,
    );

    assert_eq!(
        frame.backend.evaluator.bound_texture(BindingId::WeatherMap),
        Some(weather)
    );
}

#[test]
fn closure_provider_drives_renderer() {
    let mut backend = RecordingBackend::new();
    let camera = CameraRayBasis::from_camera(&test_camera(HD));
    let config = CloudVolumeConfig::default();
    let request = FrameRequest {
        config: &config,
        camera: &camera,
        screen: HD,
        targets: host_frame(HD),
    };

    let mut renderer = CloudRenderer::new(VolumeFn(|| Some(cloud_marker())));
    renderer.render(&request, &mut backend.services()).unwrap();
    assert_eq!(backend.pass_count(), 3);
}
