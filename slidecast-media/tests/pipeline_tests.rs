//! End-to-end tests of the media pipeline
//!
//! Camera frames go through the transmit buffer and the JPEG data-URL codec,
//! then back through the decode queue onto the output surface.

use slidecast_media::*;

// ============================================================================
// TRANSMIT SIDE
// ============================================================================

#[tokio::test]
async fn test_camera_frame_encodes_at_target_resolution() {
    let camera = acquire_camera(
        CameraSelection::Synthetic,
        CameraConstraints {
            ideal_resolution: Resolution::new(320, 240),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let mut buffer = FrameBuffer::new(Resolution::new(160, 120));
    let frame = camera.grab().unwrap();
    let url = buffer.draw_and_encode(&frame, DEFAULT_JPEG_QUALITY).unwrap();

    assert!(url.starts_with(JPEG_DATA_URL_PREFIX));
    let decoded = decode_data_url(&url).unwrap();
    assert_eq!(decoded.resolution(), Resolution::new(160, 120));
}

#[tokio::test]
async fn test_failing_camera_reports_capture_failure() {
    let camera = CameraHandle::new(Box::new(
        SyntheticCamera::new(Resolution::new(16, 16), 30).failing_after(2),
    ));
    tokio_test::assert_ok!(camera.grab());
    tokio_test::assert_ok!(camera.grab());

    let error = tokio_test::assert_err!(camera.grab());
    let relay: slidecast_core::RelayError = error.into();
    assert_eq!(relay.error_code(), "FRAME_PROCESSING_FAILED");
}

// ============================================================================
// RECEIVE SIDE
// ============================================================================

#[tokio::test]
async fn test_decoded_frame_sets_surface_dimensions() {
    let mut queue = DecodeQueue::default();
    let mut surface = OutputSurface::default();
    surface.attach();

    for (width, height) in [(64, 48), (120, 90)] {
        let url = encode_frame(&VideoFrame::blank(Resolution::new(width, height)), 0.85).unwrap();
        queue.submit(url);
        match queue.next_outcome().await {
            DecodeOutcome::Ready { frame, .. } => {
                assert_eq!(frame.resolution(), Resolution::new(width, height));
                assert!(surface.present(&frame).unwrap());
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
        assert_eq!(surface.dimensions(), Some(Resolution::new(width, height)));
    }
}

#[tokio::test]
async fn test_decode_failure_leaves_surface_unchanged() {
    let mut queue = DecodeQueue::default();
    let mut surface = OutputSurface::default();
    surface.attach();

    let good = encode_frame(&VideoFrame::blank(Resolution::new(40, 30)), 0.85).unwrap();
    queue.submit(good);
    if let DecodeOutcome::Ready { frame, .. } = queue.next_outcome().await {
        surface.present(&frame).unwrap();
    }

    queue.submit("data:image/jpeg;base64,/9j/AAAA".to_string());
    assert!(matches!(
        queue.next_outcome().await,
        DecodeOutcome::Failed { .. }
    ));
    assert_eq!(surface.dimensions(), Some(Resolution::new(40, 30)));
    assert_eq!(surface.frames_rendered(), 1);
}

// ============================================================================
// RELEASE
// ============================================================================

#[tokio::test]
async fn test_release_cancels_in_flight_decode() {
    let mut queue = DecodeQueue::default();
    let resources = MediaResources::new(
        FrameBuffer::shared(Resolution::SVGA),
        OutputSurface::shared(Box::new(NullSink)),
        queue.canceller(),
    );
    resources.initialize_buffers();
    resources
        .acquire_camera(CameraSelection::Synthetic, CameraConstraints::default())
        .await
        .unwrap();

    let url = encode_frame(&VideoFrame::blank(Resolution::new(32, 32)), 0.85).unwrap();
    queue.submit(url);
    resources.release_all();

    assert!(matches!(
        queue.next_outcome().await,
        DecodeOutcome::Stale { .. }
    ));
    assert!(!resources.surface().lock().is_attached());
    assert!(resources.camera().is_none());
}
