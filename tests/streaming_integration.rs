//! Integration tests for streaming acquisitions into backing arrays
//!
//! These tests run a simulated acquisition end to end:
//! - Frames land at the right layer and coordinate, byte for byte
//! - Finishing or cancelling a plan drains everything already buffered
//! - Plans not started through the pipeline are left alone

mod common;

use common::builders::{grid_at_first_position, split_two_channel, timelapse, PipelineBuilder};
use common::mock_helpers::DisplayCall;
use common::test_timeout;
use mda_stream::acquisition::SequenceObserver;
use mda_stream::sequence::{
    AcquisitionEvent, LayerId, SequencePlan, AXIS_CHANNEL, AXIS_POSITION, AXIS_TIME,
};
use mda_stream::stream::StreamState;
use mda_stream::types::{ElementType, Frame};
use std::sync::Arc;

#[test]
fn test_timelapse_frames_stored_byte_for_byte() {
    let pipeline = PipelineBuilder::new().image_size(512, 512).bit_depth(8).build();
    let plan = timelapse(3);
    let uid = plan.uid;

    let simulated = pipeline.camera.run(plan, &pipeline.engine).unwrap();
    assert_eq!(simulated.frames_delivered, 3);

    let report = pipeline.engine.wait_idle(test_timeout()).unwrap().unwrap();
    assert_eq!(report.frames_received, 3);
    assert_eq!(report.frames_written, 3);

    let store = pipeline.engine.store();
    let handle = store.handle(&LayerId::for_sequence(&uid)).unwrap();
    assert_eq!(store.shape(&handle).unwrap(), vec![3, 512, 512]);
    for t in 0..3 {
        let stored = store.read(&handle, &[t]).unwrap();
        assert_eq!(stored.element_type(), ElementType::U8);
        assert_eq!(
            stored.to_le_bytes(),
            pipeline.camera.frame_for(t).to_le_bytes(),
            "frame t={} differs",
            t
        );
    }
}

#[test]
fn test_split_channels_route_to_their_own_layer() {
    let pipeline = PipelineBuilder::new().image_size(512, 512).bit_depth(16).build();
    let plan = Arc::new(split_two_channel(2));
    let store = pipeline.engine.store().clone();

    pipeline.engine.sequence_started(Arc::clone(&plan)).unwrap();

    let dapi = store
        .handle(&LayerId::for_channel(&plan.uid, "DAPI_000"))
        .unwrap();
    let fitc = store
        .handle(&LayerId::for_channel(&plan.uid, "FITC_001"))
        .unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.shape(&dapi).unwrap(), vec![2, 512, 512]);
    assert_eq!(store.shape(&fitc).unwrap(), vec![2, 512, 512]);

    let frame = Frame::filled(ElementType::U16, (512, 512), 4095);
    let event = AcquisitionEvent::new(Arc::clone(&plan), &[(AXIS_TIME, 0), (AXIS_CHANNEL, 1)]);
    pipeline.engine.frame_ready(frame.clone(), event);
    pipeline.engine.sequence_finished(Arc::clone(&plan));
    pipeline.engine.wait_idle(test_timeout()).unwrap();

    assert_eq!(store.written_chunks(&fitc).unwrap(), 1);
    assert_eq!(store.written_chunks(&dapi).unwrap(), 0);
    assert_eq!(store.read(&fitc, &[0]).unwrap(), frame);
}

#[test]
fn test_cancel_keeps_frames_already_delivered() {
    let pipeline = PipelineBuilder::new().cancel_after(2).build();
    let plan = timelapse(5);
    let uid = plan.uid;

    let simulated = pipeline.camera.run(plan, &pipeline.engine).unwrap();
    assert!(simulated.cancelled);

    let report = pipeline.engine.wait_idle(test_timeout()).unwrap().unwrap();
    assert_eq!(report.frames_written, 2);
    assert!(report.is_complete());

    let store = pipeline.engine.store();
    let handle = store.handle(&LayerId::for_sequence(&uid)).unwrap();
    assert_eq!(store.written_chunks(&handle).unwrap(), 2);
}

#[test]
fn test_drain_writes_every_buffered_frame() {
    const N: usize = 40;
    let pipeline = PipelineBuilder::new().build();
    let plan = Arc::new(timelapse(N));

    pipeline.engine.sequence_started(Arc::clone(&plan)).unwrap();
    for (i, event) in plan.events().into_iter().enumerate() {
        pipeline
            .engine
            .frame_ready(Frame::filled(ElementType::U8, (16, 16), i as u32), event);
    }
    pipeline.engine.sequence_finished(Arc::clone(&plan));

    let report = pipeline.engine.wait_idle(test_timeout()).unwrap().unwrap();
    assert_eq!(pipeline.engine.state(), StreamState::Idle);
    assert_eq!(report.frames_received, N as u64);
    assert_eq!(report.frames_written, N as u64);

    let store = pipeline.engine.store();
    let handle = store.handle(&LayerId::for_sequence(&plan.uid)).unwrap();
    assert_eq!(store.written_chunks(&handle).unwrap(), N);
    // FIFO: each frame at its own time point
    for t in [0, N / 2, N - 1] {
        assert_eq!(
            store.read(&handle, &[t]).unwrap(),
            Frame::filled(ElementType::U8, (16, 16), t as u32)
        );
    }
}

#[test]
fn test_foreign_plan_touches_nothing() {
    let pipeline = PipelineBuilder::new().build();
    let plan = SequencePlan::builder()
        .axis(AXIS_TIME, 3)
        .without_stream_meta()
        .build();

    pipeline.camera.run(plan, &pipeline.engine).unwrap();

    assert!(pipeline.engine.store().is_empty());
    assert!(pipeline.display.calls().is_empty());
    assert!(pipeline.camera.pause_log().is_empty());
    assert_eq!(pipeline.engine.wait_idle(test_timeout()).unwrap(), None);
}

#[test]
fn test_position_without_grid_writes_at_grid_zero() {
    let pipeline = PipelineBuilder::new().build();
    let plan = grid_at_first_position(3);
    let uid = plan.uid;

    pipeline.camera.run(plan, &pipeline.engine).unwrap();
    let report = pipeline.engine.wait_idle(test_timeout()).unwrap().unwrap();
    assert_eq!(report.frames_written, 4);
    assert_eq!(report.routing_failures, 0);

    let store = pipeline.engine.store();
    let handle = store.handle(&LayerId::for_sequence(&uid)).unwrap();
    assert_eq!(store.shape(&handle).unwrap(), vec![2, 3, 16, 16]);
    // Position 1 has no grid; its single frame sits at g=0
    assert_eq!(
        store.read(&handle, &[1, 0]).unwrap(),
        pipeline.camera.frame_for(3)
    );
    assert_eq!(store.written_chunks(&handle).unwrap(), 4);
}

#[test]
fn test_stage_positions_recorded_per_write() {
    let pipeline = PipelineBuilder::new().build();
    let plan = grid_at_first_position(2);
    let name = format!("Exp_{}", plan.uid);

    pipeline.camera.run(plan, &pipeline.engine).unwrap();
    pipeline.engine.wait_idle(test_timeout()).unwrap();

    let positions = pipeline.display.positions(&name);
    assert_eq!(positions.len(), 3);
    assert_eq!(positions[0].coordinate, vec![0, 0]);
    assert_eq!(positions[2].x, Some(500.0));
}

#[test]
fn test_viewer_follows_written_frames() {
    let pipeline = PipelineBuilder::new().build();
    let plan = timelapse(2);
    let name = format!("Exp_{}", plan.uid);

    pipeline.camera.run(plan, &pipeline.engine).unwrap();
    pipeline.engine.wait_idle(test_timeout()).unwrap();

    let calls = pipeline.display.calls();
    assert_eq!(calls[0], DisplayCall::CreateSurface(name.clone()));
    assert_eq!(
        calls[1],
        DisplayCall::AxisLabels(vec!["t".into(), "y".into(), "x".into()])
    );
    assert!(calls.contains(&DisplayCall::CurrentIndex(vec![1])));
    // Refresh is a hide followed by a show
    let hide = calls
        .iter()
        .position(|c| *c == DisplayCall::Visible(name.clone(), false))
        .unwrap();
    assert_eq!(calls[hide + 1], DisplayCall::Visible(name, true));
}

#[test]
fn test_back_to_back_plans_keep_their_arrays() {
    let pipeline = PipelineBuilder::new().build();
    let first = timelapse(2);
    let second = timelapse(3);
    let (first_uid, second_uid) = (first.uid, second.uid);

    pipeline.camera.run(first, &pipeline.engine).unwrap();
    // The second start waits for the first drain itself
    pipeline.camera.run(second, &pipeline.engine).unwrap();
    let report = pipeline.engine.wait_idle(test_timeout()).unwrap().unwrap();

    assert_eq!(report.sequence_uid, second_uid);
    assert_eq!(report.frames_written, 3);
    assert_eq!(pipeline.engine.layers(&first_uid).len(), 1);
    assert_eq!(pipeline.engine.store().len(), 2);
}

#[test]
fn test_frame_after_finish_is_dropped() {
    let pipeline = PipelineBuilder::new().build();
    let plan = Arc::new(SequencePlan::builder().axis(AXIS_POSITION, 2).build());

    pipeline.engine.sequence_started(Arc::clone(&plan)).unwrap();
    pipeline.engine.sequence_finished(Arc::clone(&plan));
    let late = AcquisitionEvent::new(Arc::clone(&plan), &[(AXIS_POSITION, 1)]);
    pipeline
        .engine
        .frame_ready(Frame::zeros(ElementType::U8, (16, 16)), late);

    let report = pipeline.engine.wait_idle(test_timeout()).unwrap().unwrap();
    assert_eq!(report.frames_received, 0);
    assert_eq!(report.frames_written, 0);
}
