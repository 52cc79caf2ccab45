//! Store contract tests.
//!
//! Every check runs against both backends:
//! - Command lookup by name, case-insensitive and scoped to the device
//! - Atomic step reordering
//! - Liveness and `last_used` write-backs
//! - Button and mapping lookups

use chrono::Utc;
use remotehub_core::model::*;
use remotehub_core::{HubStore, StoreError};
use remotehub_storage::{MemoryStore, RedbStore};

fn backends() -> Vec<(&'static str, Box<dyn HubStore>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        ("redb", Box::new(RedbStore::temporary().unwrap())),
    ]
}

fn three_step_activity() -> Activity {
    Activity::new(1, "Movie Night")
        .with_step(ActivityStep::new(11, 1, 101, 1))
        .with_step(ActivityStep::new(12, 1, 102, 2))
        .with_step(ActivityStep::new(13, 1, 103, 3))
}

fn order_of(activity: &Activity) -> Vec<StepId> {
    activity.ordered_steps().iter().map(|s| s.id).collect()
}

#[test]
fn test_find_command_by_name() {
    for (name, store) in backends() {
        store
            .save_command(&DeviceCommand::new(1, 7, "Volume Up", CommandType::VolumeUp))
            .unwrap();
        store
            .save_command(&DeviceCommand::new(2, 8, "Volume Up", CommandType::VolumeUp))
            .unwrap();

        let found = store.find_command(7, "volume up").unwrap();
        assert_eq!(found.map(|c| c.id), Some(1), "{}", name);
        assert!(store.find_command(9, "volume up").unwrap().is_none(), "{}", name);
        assert_eq!(store.commands_for_device(8).unwrap().len(), 1, "{}", name);
    }
}

#[test]
fn test_duplicate_command_name_conflicts() {
    for (name, store) in backends() {
        store
            .save_command(&DeviceCommand::new(1, 7, "Mute", CommandType::Mute))
            .unwrap();
        let err = store
            .save_command(&DeviceCommand::new(2, 7, "MUTE", CommandType::Mute))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{}", name);

        store
            .save_command(&DeviceCommand::new(3, 7, "Écran", CommandType::Custom))
            .unwrap();
        let err = store
            .save_command(&DeviceCommand::new(4, 7, "écran", CommandType::Custom))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{}", name);

        store
            .save_command(&DeviceCommand::new(5, 7, " Power", CommandType::Power))
            .unwrap();
        let err = store
            .save_command(&DeviceCommand::new(6, 7, "power", CommandType::Power))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{}", name);
        assert_eq!(store.find_command(7, "POWER").unwrap().map(|c| c.id), Some(5), "{}", name);
    }
}

#[test]
fn test_reorder_steps_round_trip() {
    for (name, store) in backends() {
        store.save_activity(&three_step_activity()).unwrap();

        store.reorder_activity_steps(1, &[13, 11, 12]).unwrap();
        let activity = store.get_activity(1).unwrap().unwrap();
        assert_eq!(order_of(&activity), vec![13, 11, 12], "{}", name);
        let orders: Vec<u32> = activity.ordered_steps().iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3], "{}", name);

        store.reorder_activity_steps(1, &[11, 12, 13]).unwrap();
        let activity = store.get_activity(1).unwrap().unwrap();
        assert_eq!(order_of(&activity), vec![11, 12, 13], "{}", name);
    }
}

#[test]
fn test_invalid_reorder_changes_nothing() {
    for (name, store) in backends() {
        store.save_activity(&three_step_activity()).unwrap();

        // Missing a step.
        let err = store.reorder_activity_steps(1, &[13, 11]).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)), "{}", name);
        // Foreign step id.
        assert!(store.reorder_activity_steps(1, &[13, 11, 99]).is_err());
        // Duplicate id.
        assert!(store.reorder_activity_steps(1, &[13, 13, 11]).is_err());

        let activity = store.get_activity(1).unwrap().unwrap();
        assert_eq!(order_of(&activity), vec![11, 12, 13], "{}", name);
    }
}

#[test]
fn test_reorder_unknown_activity() {
    for (name, store) in backends() {
        let err = store.reorder_activity_steps(5, &[1]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)), "{}", name);
    }
}

#[test]
fn test_liveness_and_last_used_write_back() {
    for (name, store) in backends() {
        store
            .save_device(
                &Device::new(3, "Living Room TV", ConnectionType::WebOs)
                    .with_address("192.168.1.20"),
            )
            .unwrap();
        store.save_activity(&three_step_activity()).unwrap();

        let now = Utc::now();
        store.set_device_liveness(3, true, Some(now)).unwrap();
        store.touch_activity(1, now).unwrap();

        let device = store.get_device(3).unwrap().unwrap();
        assert!(device.is_online, "{}", name);
        assert_eq!(device.last_seen, Some(now), "{}", name);
        assert_eq!(device.address.as_deref(), Some("192.168.1.20"), "{}", name);

        let activity = store.get_activity(1).unwrap().unwrap();
        assert_eq!(activity.last_used, Some(now), "{}", name);
    }
}

#[test]
fn test_button_and_mapping_lookup() {
    for (name, store) in backends() {
        store.save_remote(&UsbRemote::new(1, "Couch remote")).unwrap();
        store.save_button(&UsbRemoteButton::new(10, 1, 115)).unwrap();
        store.save_button(&UsbRemoteButton::new(11, 1, 114)).unwrap();

        store
            .save_mapping(&UsbRemoteButtonMapping::new(1, 10, ButtonEventType::KeyDown, 3, 20))
            .unwrap();
        store
            .save_mapping(
                &UsbRemoteButtonMapping::new(2, 10, ButtonEventType::KeyDown, 4, 21).disabled(),
            )
            .unwrap();
        store
            .save_mapping(&UsbRemoteButtonMapping::new(3, 10, ButtonEventType::LongPress, 3, 22))
            .unwrap();

        let button = store.find_button(1, 115).unwrap().unwrap();
        assert_eq!(button.id, 10, "{}", name);
        assert!(store.find_button(2, 115).unwrap().is_none(), "{}", name);

        let mappings = store.mappings_for(10, ButtonEventType::KeyDown).unwrap();
        assert_eq!(mappings.len(), 2, "{}", name);
        assert!(mappings.iter().any(|m| !m.enabled), "{}", name);
    }
}

#[test]
fn test_redb_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.redb");

    {
        let store = RedbStore::open(&path).unwrap();
        store.save_activity(&three_step_activity()).unwrap();
        store.reorder_activity_steps(1, &[12, 13, 11]).unwrap();
    }

    let store = RedbStore::open(&path).unwrap();
    let activity = store.get_activity(1).unwrap().unwrap();
    assert_eq!(order_of(&activity), vec![12, 13, 11]);
    assert_eq!(store.list_activities().unwrap().len(), 1);
}
