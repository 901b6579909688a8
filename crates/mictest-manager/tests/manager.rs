//! End-to-end behaviour of the device manager against the simulated platform.

use futures_lite::future::{block_on, zip};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mictest_audio::{ContextState, DriverKind};
use mictest_comms::create_level_channel;
use mictest_core::{DeviceKind, Error, TrackReadyState};
use mictest_manager::{AudioDeviceManager, InputRoute, ManagerConfig, MeterTask};
use mictest_media::{SimulatedDevice, SimulatedPlatform};
use mictest_node::NodeKind;

fn manual_config() -> ManagerConfig {
    ManagerConfig {
        driver: DriverKind::Manual,
        ..ManagerConfig::default()
    }
}

fn demo() -> SimulatedPlatform {
    SimulatedPlatform::demo().unwrap()
}

fn started(platform: &SimulatedPlatform) -> AudioDeviceManager<SimulatedPlatform> {
    let manager = AudioDeviceManager::new(platform.clone(), manual_config());
    block_on(manager.create_context()).unwrap();
    manager
}

#[test]
fn test_get_devices_sorted_by_label() {
    let platform = SimulatedPlatform::builder()
        .input("mic-z", "zeta mic")
        .input("mic-a", "Alpha mic")
        .input("mic-b", "beta mic")
        .output("spk-1", "Speakers")
        .build();
    let manager = started(&platform);

    let inputs = block_on(manager.get_devices(DeviceKind::AudioInput)).unwrap();
    let labels: Vec<_> = inputs.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["Alpha mic", "beta mic", "zeta mic"]);

    let outputs = block_on(manager.get_devices(DeviceKind::AudioOutput)).unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].kind, DeviceKind::AudioOutput);

    // Every probe stream was released
    assert_eq!(platform.tracks().len(), 2);
    assert!(platform.live_tracks().is_empty());
}

#[test]
fn test_get_devices_requires_permission() {
    let platform = demo();
    platform.set_permission(false);
    let manager = started(&platform);

    let result = block_on(manager.get_devices(DeviceKind::AudioOutput));
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert!(platform.tracks().is_empty());
}

#[test]
fn test_switching_input_ends_previous_track() {
    let platform = demo();
    let manager = started(&platform);

    block_on(manager.set_input_device("mic-builtin")).unwrap();
    let tracks = manager.get_input_tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].kind, "audio");
    assert_eq!(tracks[0].settings.device_id, "mic-builtin");
    let first = platform.live_tracks().remove(0);

    block_on(manager.set_input_device("mic-usb")).unwrap();
    assert_eq!(first.ready_state(), TrackReadyState::Ended);

    let live = platform.live_tracks();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].device_id(), "mic-usb");
    assert_eq!(manager.get_input_tracks()[0].ready_state, TrackReadyState::Live);
    assert_eq!(manager.current_input_device().as_deref(), Some("mic-usb"));
}

#[test]
fn test_repeated_switches_keep_one_stream() {
    let platform = demo();
    let manager = started(&platform);

    for device in ["mic-builtin", "mic-usb", "mic-usb", "mic-builtin"] {
        block_on(manager.set_input_device(device)).unwrap();
        assert_eq!(platform.live_tracks().len(), 1);
    }
    assert_eq!(platform.tracks().len(), 4);
}

#[test]
fn test_overlapping_switch_supersedes_older_request() {
    let platform = SimulatedPlatform::builder()
        .device(SimulatedDevice::input("mic-slow", "Slow mic").with_acquire_polls(5))
        .input("mic-fast", "Fast mic")
        .build();
    let manager = started(&platform);

    let (slow, fast) = block_on(zip(
        manager.set_input_device("mic-slow"),
        manager.set_input_device("mic-fast"),
    ));

    assert!(matches!(slow, Err(Error::Superseded(_))));
    assert!(fast.is_ok());

    let live = platform.live_tracks();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].device_id(), "mic-fast");
    // The superseded stream was opened and then stopped
    assert_eq!(platform.tracks().len(), 2);
    assert_eq!(manager.current_input_device().as_deref(), Some("mic-fast"));
    assert_eq!(manager.input_route(), InputRoute::Direct);
}

#[test]
fn test_failed_newer_switch_leaves_no_stream() {
    let platform = SimulatedPlatform::builder()
        .device(SimulatedDevice::input("mic-slow", "Slow mic").with_acquire_polls(3))
        .device(SimulatedDevice::input("mic-gone", "Gone mic").unavailable())
        .build();
    let manager = started(&platform);

    let (slow, gone) = block_on(zip(
        manager.set_input_device("mic-slow"),
        manager.set_input_device("mic-gone"),
    ));

    assert!(matches!(slow, Err(Error::Superseded(_))));
    assert!(matches!(gone, Err(Error::DeviceUnavailable(_))));
    assert!(platform.live_tracks().is_empty());
    assert!(!manager.has_input_stream());
}

#[test]
fn test_unavailable_device_leaves_no_tracks() {
    let platform = demo();
    let manager = started(&platform);

    block_on(manager.set_input_device("mic-builtin")).unwrap();
    platform.set_available("mic-usb", false);

    let result = block_on(manager.set_input_device("mic-usb"));
    assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
    assert!(platform.live_tracks().is_empty());
    assert!(manager.get_input_tracks().is_empty());
    assert_eq!(manager.input_route(), InputRoute::Disconnected);

    // The manager stays usable
    block_on(manager.set_input_device("mic-builtin")).unwrap();
    assert_eq!(platform.live_tracks().len(), 1);
}

#[test]
fn test_permission_denied_on_selection() {
    let platform = demo();
    let manager = started(&platform);
    platform.set_permission(false);

    let result = block_on(manager.set_input_device("mic-builtin"));
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert!(!manager.has_input_stream());
}

#[test]
fn test_buffer_toggle_alternates_starting_paused() {
    let platform = demo();
    let manager = started(&platform);
    assert!(manager.is_buffer_paused());

    let mut states = Vec::new();
    for _ in 0..4 {
        states.push(block_on(manager.toggle_audio_buffer()).unwrap());
        assert_eq!(manager.is_buffer_paused(), *states.last().unwrap());
    }
    assert_eq!(states, vec![false, true, false, true]);

    // Decoded once for the whole context lifetime
    assert_eq!(platform.fetch_count("beat.wav"), 1);
}

#[test]
fn test_recreate_while_buffer_plays() {
    let platform = demo();
    let manager = started(&platform);
    let first_context = manager.context_id();

    assert!(!block_on(manager.toggle_audio_buffer()).unwrap());
    block_on(manager.create_context()).unwrap();

    assert_ne!(manager.context_id(), first_context);
    assert!(manager.is_buffer_paused());

    assert!(!block_on(manager.toggle_audio_buffer()).unwrap());
    assert_eq!(platform.fetch_count("beat.wav"), 2);
}

#[test]
fn test_fetch_superseded_by_recreate() {
    let platform = SimulatedPlatform::builder()
        .asset(
            "beat.wav",
            mictest_media::simulated::tone_wav(880.0, 0.1, 48000).unwrap(),
        )
        .fetch_polls(3)
        .build();
    let manager = started(&platform);

    let (toggle, recreate) = block_on(zip(manager.toggle_audio_buffer(), manager.create_context()));
    assert!(recreate.is_ok());
    assert!(matches!(toggle, Err(Error::Superseded(_))));
    assert!(manager.is_buffer_paused());

    assert!(!block_on(manager.toggle_audio_buffer()).unwrap());
    assert_eq!(platform.fetch_count("beat.wav"), 2);
}

#[test]
fn test_missing_and_corrupt_fixtures() {
    let platform = SimulatedPlatform::builder()
        .asset("beat.wav", b"not audio".to_vec())
        .build();
    let manager = started(&platform);

    assert!(matches!(
        block_on(manager.toggle_audio_buffer()),
        Err(Error::DecodeFailure(_))
    ));
    assert!(manager.is_buffer_paused());

    assert!(matches!(
        block_on(manager.toggle_audio_element()),
        Err(Error::Io(_))
    ));
    assert!(manager.is_element_paused());
}

#[test]
fn test_delay_toggles_in_pairs() {
    let platform = demo();
    let manager = started(&platform);
    block_on(manager.set_input_device("mic-builtin")).unwrap();

    for _ in 0..2 {
        assert_eq!(manager.input_route(), InputRoute::Direct);
        assert!(manager.toggle_delay().unwrap());
        assert_eq!(manager.input_route(), InputRoute::Delayed);
        assert!(!manager.toggle_delay().unwrap());
    }
    assert_eq!(manager.input_route(), InputRoute::Direct);
    assert!(!manager.is_delay_enabled());
}

#[test]
fn test_delay_applies_to_next_input() {
    let platform = demo();
    let manager = started(&platform);

    assert!(manager.toggle_delay().unwrap());
    assert_eq!(manager.input_route(), InputRoute::Disconnected);

    block_on(manager.set_input_device("mic-usb")).unwrap();
    assert_eq!(manager.input_route(), InputRoute::Delayed);
}

#[test]
fn test_echo_cancellation_reacquires_input() {
    let platform = demo();
    let manager = started(&platform);

    // Without an input only the flag changes
    assert!(block_on(manager.toggle_echo_cancellation()).unwrap());
    assert!(platform.tracks().is_empty());
    assert!(!block_on(manager.toggle_echo_cancellation()).unwrap());

    block_on(manager.set_input_device("mic-builtin")).unwrap();
    assert!(!manager.get_input_tracks()[0].settings.echo_cancellation);

    assert!(block_on(manager.toggle_echo_cancellation()).unwrap());
    let tracks = platform.tracks();
    assert_eq!(tracks.len(), 2);
    assert!(!tracks[0].is_live());
    assert!(tracks[1].is_live());
    assert!(tracks[1].settings().echo_cancellation);
    assert!(manager.is_echo_cancellation_enabled());
}

#[test]
fn test_output_routing() {
    let platform = demo();
    let manager = started(&platform);

    // Load and start the background track first
    assert!(!block_on(manager.toggle_audio_element()).unwrap());
    manager.set_output_device("spk-hdmi").unwrap();

    let routes = manager.output_routes();
    assert_eq!(routes.gain_targets, vec![NodeKind::StreamDestination]);
    assert_eq!(routes.element_sink.as_deref(), Some("spk-hdmi"));
    assert_eq!(routes.background_sink.as_deref(), Some("spk-hdmi"));
    assert_eq!(manager.current_output_device().as_deref(), Some("spk-hdmi"));

    let elements = platform.elements();
    assert_eq!(elements.len(), 2);
    assert!(elements.iter().all(|e| !e.paused));
    assert_eq!(elements[0].volume, 0.2);

    // Switching again replaces the output element
    manager.set_output_device("spk-builtin").unwrap();
    assert_eq!(platform.elements().len(), 2);
    assert_eq!(
        manager.output_routes().background_sink.as_deref(),
        Some("spk-builtin")
    );
}

#[test]
fn test_background_uses_selected_sink_when_loaded_later() {
    let platform = demo();
    let manager = started(&platform);

    manager.set_output_device("spk-hdmi").unwrap();
    assert!(!block_on(manager.toggle_audio_element()).unwrap());
    assert_eq!(
        manager.output_routes().background_sink.as_deref(),
        Some("spk-hdmi")
    );
}

#[test]
fn test_unsupported_sink_leaves_graph_untouched() {
    let platform = SimulatedPlatform::builder()
        .input("mic-a", "Mic A")
        .output("spk-1", "Speakers")
        .sink_routing(false)
        .build();
    let manager = started(&platform);

    let result = manager.set_output_device("spk-1");
    assert!(matches!(result, Err(Error::UnsupportedOperation(_))));

    let routes = manager.output_routes();
    assert_eq!(routes.gain_targets, vec![NodeKind::Destination]);
    assert_eq!(routes.element_sink, None);
    assert_eq!(manager.current_output_device(), None);
    assert!(platform.elements().is_empty());
}

#[test]
fn test_unknown_sink_leaves_graph_untouched() {
    let platform = demo();
    let manager = started(&platform);

    let result = manager.set_output_device("spk-404");
    assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
    assert_eq!(
        manager.output_routes().gain_targets,
        vec![NodeKind::Destination]
    );
    assert!(platform.elements().is_empty());
}

#[test]
fn test_recreate_reapplies_selections() {
    let platform = demo();
    let manager = started(&platform);

    block_on(manager.set_input_device("mic-usb")).unwrap();
    manager.set_output_device("spk-builtin").unwrap();
    assert!(!block_on(manager.toggle_audio_element()).unwrap());
    let old_track = platform.live_tracks().remove(0);
    let old_context = manager.context_id();

    block_on(manager.create_context()).unwrap();

    assert_ne!(manager.context_id(), old_context);
    assert_eq!(manager.context_state(), ContextState::Running);
    assert!(!old_track.is_live());

    let live = platform.live_tracks();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].device_id(), "mic-usb");
    assert_eq!(manager.input_route(), InputRoute::Direct);

    let routes = manager.output_routes();
    assert_eq!(routes.gain_targets, vec![NodeKind::StreamDestination]);
    assert_eq!(routes.element_sink.as_deref(), Some("spk-builtin"));

    // The background element survives; the old output element is gone
    assert!(!manager.is_element_paused());
    assert_eq!(platform.fetch_count("guitar.wav"), 1);
    assert_eq!(platform.elements().len(), 2);
}

#[test]
fn test_recreate_restores_output_when_input_is_gone() {
    let platform = demo();
    let manager = started(&platform);

    block_on(manager.set_input_device("mic-usb")).unwrap();
    manager.set_output_device("spk-builtin").unwrap();
    assert!(platform.set_available("mic-usb", false));

    let result = block_on(manager.create_context());
    assert!(matches!(result, Err(Error::DeviceUnavailable(_))));

    // The context is usable and the output selection still holds
    assert_eq!(manager.context_state(), ContextState::Running);
    assert!(!manager.has_input_stream());
    assert!(platform.live_tracks().is_empty());
    let routes = manager.output_routes();
    assert_eq!(routes.gain_targets, vec![NodeKind::StreamDestination]);
    assert_eq!(routes.element_sink.as_deref(), Some("spk-builtin"));
    assert_eq!(manager.current_output_device().as_deref(), Some("spk-builtin"));
    assert_eq!(manager.current_input_device().as_deref(), Some("mic-usb"));

    // Once the device is back, selecting it again works on the new context
    assert!(platform.set_available("mic-usb", true));
    block_on(manager.set_input_device("mic-usb")).unwrap();
    assert_eq!(manager.input_route(), InputRoute::Direct);
}

#[test]
fn test_background_sink_failure_keeps_previous_output() {
    let platform = demo();
    let manager = started(&platform);

    assert!(!block_on(manager.toggle_audio_element()).unwrap());
    manager.set_output_device("spk-builtin").unwrap();
    // The background element was created first
    assert!(platform.fail_sink_changes(0));

    let result = manager.set_output_device("spk-hdmi");
    assert!(matches!(result, Err(Error::DeviceUnavailable(_))));

    let routes = manager.output_routes();
    assert_eq!(routes.gain_targets, vec![NodeKind::StreamDestination]);
    assert_eq!(routes.element_sink.as_deref(), Some("spk-builtin"));
    assert_eq!(routes.background_sink.as_deref(), Some("spk-builtin"));
    assert_eq!(manager.current_output_device().as_deref(), Some("spk-builtin"));

    // The staged output element was dropped; both survivors still play
    let elements = platform.elements();
    assert_eq!(elements.len(), 2);
    assert!(elements.iter().all(|e| !e.paused));
}

#[test]
fn test_element_toggle() {
    let platform = demo();
    let manager = started(&platform);
    assert!(manager.is_element_paused());

    assert!(!block_on(manager.toggle_audio_element()).unwrap());
    assert!(block_on(manager.toggle_audio_element()).unwrap());
    assert!(manager.is_element_paused());
    assert_eq!(platform.fetch_count("guitar.wav"), 1);
}

#[test]
fn test_constraints_reported() {
    let platform = demo();
    let manager = AudioDeviceManager::new(platform, manual_config());
    let constraints = manager.get_constraints();
    assert!(constraints.device_id);
    assert!(constraints.echo_cancellation);
}

#[test]
fn test_level_stays_in_range() {
    let platform = demo();
    let manager = AudioDeviceManager::new(
        platform,
        ManagerConfig {
            driver: DriverKind::Clock,
            ..ManagerConfig::default()
        },
    );
    assert_eq!(manager.get_analyser_level(), 0.0);

    block_on(manager.create_context()).unwrap();
    let silent = manager.get_analyser_level();
    assert!((0.0..=1.0).contains(&silent));

    block_on(manager.set_input_device("mic-builtin")).unwrap();
    thread::sleep(Duration::from_millis(100));
    let level = manager.get_analyser_level();
    assert!((0.0..=1.0).contains(&level));
    assert!(level > 0.0);
}

#[test]
fn test_meter_survives_recreate() {
    let platform = demo();
    let manager = Arc::new(AudioDeviceManager::new(
        platform,
        ManagerConfig {
            driver: DriverKind::Clock,
            ..ManagerConfig::default()
        },
    ));
    block_on(manager.create_context()).unwrap();
    block_on(manager.set_input_device("mic-builtin")).unwrap();

    let (publisher, mut reader) = create_level_channel();
    let mut meter =
        MeterTask::spawn(Arc::clone(&manager), Duration::from_millis(5), publisher).unwrap();

    thread::sleep(Duration::from_millis(50));
    let before = reader.latest();
    assert!((0.0..=1.0).contains(&before.level));

    block_on(manager.create_context()).unwrap();
    thread::sleep(Duration::from_millis(50));
    let after = reader.latest();
    assert!(after.tick > before.tick);
    assert!((0.0..=1.0).contains(&after.level));

    meter.cancel();
    assert!(!meter.is_running());
}
