//! Client Integration Tests
//!
//! Runs the client operations end to end against the scripted USB/IP host
//! from `common::test_utils` and the in-memory controller:
//! - Import session outcomes and cleanup
//! - Remote device listing
//! - Local port listing and detach
//!
//! Run with: `cargo test -p client --test integration_tests`

use client::{
    Connector, Error, ImportSession, KernelForwarder, MockOpener, PortState, ProcessForwarder,
    SpawnFailure, Stage, TcpConnector, detach_port, list_exported, list_imported,
};
use common::UsbIds;
use common::test_utils::{
    FakeHost, HostLog, mock_config_descriptor, mock_device_descriptor, mock_interface,
    mock_usb_device,
};
use protocol::{BusId, OpStatus, USB_DT_CONFIG, USB_DT_DEVICE};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

const USB_IDS: &str = "\
0781  SanDisk Corp.
\t5567  Cruzer Blade
046d  Logitech, Inc.
\tc52b  Unifying Receiver
C 03  Human Interface Device
\t01  Boot Interface Subclass
\t\t01  Keyboard
\t\t02  Mouse
C 08  Mass Storage
\t06  SCSI
\t\t50  Bulk-Only
";

/// Connector that serves every connection from a freshly scripted host
struct FakeConnector<F> {
    make: F,
    hosts: Mutex<Vec<JoinHandle<HostLog>>>,
    connects: AtomicUsize,
}

impl<F: Fn() -> FakeHost + Send + Sync> FakeConnector<F> {
    fn new(make: F) -> Self {
        Self {
            make,
            hosts: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Wait for every served connection to end and collect the logs
    fn logs(&self) -> Vec<HostLog> {
        self.hosts
            .lock()
            .unwrap()
            .drain(..)
            .map(|h| h.join().unwrap())
            .collect()
    }
}

impl<F: Fn() -> FakeHost + Send + Sync> Connector for FakeConnector<F> {
    type Link = UnixStream;

    fn connect(&self, host: &str) -> client::Result<UnixStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (link, handle) = (self.make)()
            .spawn()
            .map_err(|source| Error::NetworkUnreachable {
                host: host.to_string(),
                source,
            })?;
        self.hosts.lock().unwrap().push(handle);
        Ok(link)
    }
}

fn busid(s: &str) -> BusId {
    s.parse().unwrap()
}

fn sandisk_host() -> FakeHost {
    FakeHost::new().with_device(
        mock_usb_device("1-1", 0x0781, 0x5567),
        vec![mock_interface(0x08, 0x06, 0x50)],
    )
}

// ============================================================================
// Import session
// ============================================================================

mod import {
    use super::*;

    #[test]
    fn test_successful_import() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(4, 4);

        let mut session = ImportSession::new(&connector, &opener, &KernelForwarder);
        let port = session.attach("host", &busid("1-1"), Some("SN-0001")).unwrap();

        assert_eq!(port, 0);
        assert_eq!(session.stage(), Stage::ForwardingHandedOff);
        assert_eq!(opener.open_handles(), 0);

        {
            let state = opener.state();
            assert_eq!(state.ports[0].state, PortState::Used);
            assert_eq!(state.attached.len(), 1);
            let payload = &state.attached[0];
            assert_eq!(payload.devid(), 0x0001_0002);
            assert_eq!(payload.serial(), "SN-0001");
            assert_eq!(payload.device_descriptor(), mock_device_descriptor(0x0781, 0x5567).as_slice());
            assert_eq!(payload.config_descriptor(), mock_config_descriptor(1).as_slice());
        }

        let logs = connector.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].busids, vec!["1-1".to_string()]);
        let requests: Vec<(u8, u16)> = logs[0]
            .descriptor_requests
            .iter()
            .map(|r| (r.descriptor_type(), r.length))
            .collect();
        assert_eq!(
            requests,
            vec![(USB_DT_DEVICE, 18), (USB_DT_CONFIG, 9), (USB_DT_CONFIG, 9), (USB_DT_CONFIG, 18)]
        );
        assert!(logs[0].descriptor_requests.iter().all(|r| r.devid == 0x0001_0002));
    }

    #[test]
    fn test_super_speed_device_lands_on_ss_port() {
        let connector = FakeConnector::new(|| {
            let mut device = mock_usb_device("2-1", 0x0781, 0x5581);
            device.speed = 5;
            FakeHost::new()
                .with_device(device, vec![])
                .with_device_descriptor(mock_device_descriptor(0x0781, 0x5581))
        });
        let opener = MockOpener::new(2, 2);

        let port = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("2-1"), None)
            .unwrap();
        assert_eq!(port, 2);
    }

    #[test]
    fn test_busid_mismatch_stops_before_port_work() {
        let connector = FakeConnector::new(|| sandisk_host().with_echo_busid("1-2"));
        let opener = MockOpener::new(4, 4);

        let mut session = ImportSession::new(&connector, &opener, &KernelForwarder);
        let err = session.attach("host", &busid("1-1"), None).unwrap_err();

        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(session.stage(), Stage::Failed);
        assert_eq!(opener.state().opened, 0);
        assert_eq!(opener.free_ports(), 8);
        assert!(connector.logs()[0].descriptor_requests.is_empty());
    }

    #[test]
    fn test_descriptor_for_another_device_is_rejected() {
        let connector = FakeConnector::new(|| {
            sandisk_host().with_device_descriptor(mock_device_descriptor(0xdead, 0xbeef))
        });
        let opener = MockOpener::new(2, 0);

        let mut session = ImportSession::new(&connector, &opener, &KernelForwarder);
        let err = session.attach("host", &busid("1-1"), None).unwrap_err();

        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(session.stage(), Stage::Failed);
        assert_eq!(opener.free_ports(), 2);
        assert_eq!(opener.open_handles(), 0);
        assert!(opener.state().attached.is_empty());

        // Rejected right after the device descriptor, before the config probe
        let logs = connector.logs();
        assert_eq!(logs[0].descriptor_requests.len(), 1);
    }

    #[test]
    fn test_status_codes_map_to_errors() {
        let cases = [
            (OpStatus::DeviceBusy, "busy"),
            (OpStatus::DeviceError, "error"),
            (OpStatus::NotAvailable, "na"),
        ];

        for (status, label) in cases {
            let connector = FakeConnector::new(move || sandisk_host().with_import_status(status));
            let opener = MockOpener::new(1, 0);
            let err = ImportSession::new(&connector, &opener, &KernelForwarder)
                .attach("host", &busid("1-1"), None)
                .unwrap_err();

            match status {
                OpStatus::DeviceBusy => assert!(matches!(err, Error::DeviceBusy(_)), "{}", label),
                other => assert!(
                    matches!(err, Error::RemoteRejected(s) if s == other),
                    "{}",
                    label
                ),
            }
            assert_eq!(opener.state().opened, 0);
        }
    }

    #[test]
    fn test_unknown_device() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(1, 0);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("9-9"), None)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(ref b) if b == "9-9"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_version_mismatch() {
        let connector = FakeConnector::new(|| sandisk_host().with_reply_version(0x0106));
        let opener = MockOpener::new(1, 0);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_host_hangs_up() {
        let connector = FakeConnector::new(|| sandisk_host().hang_up());
        let opener = MockOpener::new(1, 0);

        let mut session = ImportSession::new(&connector, &opener, &KernelForwarder);
        let err = session.attach("host", &busid("1-1"), None).unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(session.stage(), Stage::Failed);
    }

    #[test]
    fn test_oversized_descriptor_releases_port() {
        let connector = FakeConnector::new(|| sandisk_host().with_config_total_lengths(&[40000]));
        let opener = MockOpener::new(4, 4);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();

        assert!(matches!(err, Error::DescriptorTooLarge { size: 40000, max: 16384 }));
        assert_eq!(opener.free_ports(), 8);
        assert_eq!(opener.open_handles(), 0);
        assert!(opener.state().attached.is_empty());
    }

    #[test]
    fn test_configured_descriptor_limit() {
        let connector = FakeConnector::new(|| sandisk_host().with_config_descriptor(mock_config_descriptor(4)));
        let opener = MockOpener::new(1, 0);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .with_max_descriptor_size(32)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::DescriptorTooLarge { size: 45, max: 32 }));
        assert_eq!(opener.free_ports(), 1);
    }

    #[test]
    fn test_descriptor_failure_releases_port() {
        let connector = FakeConnector::new(|| sandisk_host().with_urb_status(-71));
        let opener = MockOpener::new(2, 0);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::DescriptorFetchFailed(_)));
        assert_eq!(opener.free_ports(), 2);
    }

    #[test]
    fn test_failed_attach_leaves_free_ports_unchanged() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(4, 4);
        opener.set_fail_attach(true);
        let before = opener.free_ports();

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();

        assert!(matches!(err, Error::AttachRejected { port: 0, .. }));
        assert_eq!(opener.free_ports(), before);
        assert_eq!(opener.open_handles(), 0);
    }

    #[test]
    fn test_no_free_slot() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(0, 2);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::NoFreeSlot(protocol::DeviceSpeed::High)));
        assert_eq!(opener.open_handles(), 0);
        assert!(connector.logs()[0].descriptor_requests.is_empty());
    }

    #[test]
    fn test_driver_unavailable() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(1, 0);
        opener.set_unavailable(true);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::DriverUnavailable(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_worker_closes_both_handles() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(2, 0);
        let forwarder = ProcessForwarder::new("/nonexistent/usbip-attacher");

        let mut session = ImportSession::new(&connector, &opener, &forwarder);
        let err = session.attach("host", &busid("1-1"), None).unwrap_err();

        assert!(matches!(err, Error::SpawnFailed(SpawnFailure::NotInstalled)));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(session.stage(), Stage::Failed);
        assert_eq!(opener.open_handles(), 0);
        // The host thread only finishes once the link is closed
        assert_eq!(connector.logs().len(), 1);
    }

    #[test]
    fn test_unreachable_host() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = TcpConnector::new(port);
        let opener = MockOpener::new(1, 0);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("127.0.0.1", &busid("1-1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::NetworkUnreachable { .. }));
        assert_eq!(opener.state().opened, 0);
    }

    #[test]
    fn test_invalid_serial_rejected_before_connecting() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(1, 0);
        let serial = "x".repeat(128);

        let err = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), Some(&serial))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSerial(_)));
        assert_eq!(connector.connects(), 0);
    }
}

// ============================================================================
// Remote device listing
// ============================================================================

mod remote_list {
    use super::*;

    fn two_device_host() -> FakeHost {
        let mut keyboard = mock_usb_device("1-2", 0x046d, 0xc52b);
        keyboard.num_interfaces = 2;
        FakeHost::new()
            .with_device(
                mock_usb_device("1-1", 0x0781, 0x5567),
                vec![mock_interface(0x08, 0x06, 0x50)],
            )
            .with_device(
                keyboard,
                vec![mock_interface(0x03, 0x01, 0x01), mock_interface(0x03, 0x01, 0x02)],
            )
    }

    #[test]
    fn test_list_devices() {
        let connector = FakeConnector::new(two_device_host);
        let names = UsbIds::parse(USB_IDS);

        let devices = list_exported(&connector, "host", &names).unwrap();
        assert_eq!(devices.len(), 2);

        assert_eq!(devices[0].busid, "1-1");
        assert_eq!(devices[0].product_name, "SanDisk Corp. : Cruzer Blade (0781:5567)");
        assert_eq!(devices[0].class_name, "(Defined at Interface level) (00/00/00)");
        assert_eq!(devices[0].interfaces, vec!["Mass Storage / SCSI / Bulk-Only (08/06/50)"]);
        assert!(devices[0].path.ends_with("/1-1"));

        assert_eq!(devices[1].busid, "1-2");
        assert_eq!(
            devices[1].interfaces,
            vec![
                "Human Interface Device / Boot Interface Subclass / Keyboard (03/01/01)",
                "Human Interface Device / Boot Interface Subclass / Mouse (03/01/02)",
            ]
        );
    }

    #[test]
    fn test_listing_is_idempotent() {
        let connector = FakeConnector::new(two_device_host);
        let names = UsbIds::parse(USB_IDS);

        let first = list_exported(&connector, "host", &names).unwrap();
        let second = list_exported(&connector, "host", &names).unwrap();
        assert_eq!(first, second);
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn test_no_devices() {
        let connector = FakeConnector::new(FakeHost::new);
        let devices = list_exported(&connector, "host", &UsbIds::empty()).unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_interfaces_are_capped() {
        let connector = FakeConnector::new(|| {
            let mut hub = mock_usb_device("1-1", 0x1d6b, 0x0002);
            hub.num_interfaces = 12;
            let interfaces = (0..12).map(|i| mock_interface(0xff, i, 0)).collect();
            FakeHost::new()
                .with_device(hub, interfaces)
                .with_device(mock_usb_device("1-2", 0x0781, 0x5567), vec![mock_interface(8, 6, 0x50)])
        });

        let devices = list_exported(&connector, "host", &UsbIds::empty()).unwrap();
        assert_eq!(devices[0].interfaces.len(), 10);
        assert!(devices[0].interfaces[9].ends_with("(ff/09/00)"));
        // The surplus records were consumed, so the next device decodes cleanly
        assert_eq!(devices[1].busid, "1-2");
        assert_eq!(devices[1].interfaces.len(), 1);
    }

    #[test]
    fn test_truncated_reply_discards_everything() {
        let connector = FakeConnector::new(|| {
            let mut device = mock_usb_device("1-1", 0x0781, 0x5567);
            device.num_interfaces = 2;
            FakeHost::new().with_device(device, vec![mock_interface(8, 6, 0x50)])
        });

        let err = list_exported(&connector, "host", &UsbIds::empty()).unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_rejected_listing() {
        let connector = FakeConnector::new(|| two_device_host().with_reply_version(0x0100));
        let err = list_exported(&connector, "host", &UsbIds::empty()).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}

// ============================================================================
// Local ports
// ============================================================================

mod local_ports {
    use super::*;

    #[test]
    fn test_attach_list_detach_cycle() {
        let connector = FakeConnector::new(sandisk_host);
        let opener = MockOpener::new(2, 2);
        let names = UsbIds::parse(USB_IDS);

        let port = ImportSession::new(&connector, &opener, &KernelForwarder)
            .attach("host", &busid("1-1"), None)
            .unwrap();

        let imported = list_imported(&opener, &names).unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].port, port);
        assert_eq!(imported[0].product_name, "SanDisk Corp. : Cruzer Blade (0781:5567)");
        assert_eq!(imported[0].speed, protocol::DeviceSpeed::High);

        detach_port(&opener, port).unwrap();
        assert!(list_imported(&opener, &names).unwrap().is_empty());
        assert!(matches!(detach_port(&opener, port), Err(Error::SlotNotFound(p)) if p == port));
        assert_eq!(opener.open_handles(), 0);
    }
}

// ============================================================================
// Properties
// ============================================================================

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn interface_list_never_exceeds_cap(count in 0u8..=32) {
            let connector = FakeConnector::new(move || {
                let mut device = mock_usb_device("1-1", 1, 2);
                device.num_interfaces = count;
                let interfaces = (0..count).map(|i| mock_interface(3, i, 0)).collect();
                FakeHost::new().with_device(device, interfaces)
            });

            let devices = list_exported(&connector, "host", &UsbIds::empty()).unwrap();
            prop_assert_eq!(devices.len(), 1);
            prop_assert_eq!(devices[0].interfaces.len(), usize::from(count).min(10));
        }
    }
}
