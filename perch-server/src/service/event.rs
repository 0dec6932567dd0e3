//! Event Service
//!
//! Announces build state changes on the event bus, labelled with the
//! repository name and its visibility so stream connections can filter.

use std::collections::HashMap;

use perch_core::domain::{Build, BuildEvent, EventType, Repo};

use crate::pubsub::{EVENTS_TOPIC, Message, Publisher};

pub fn publish(bus: &Publisher, kind: EventType, repo: &Repo, build: &Build) {
    let event = BuildEvent {
        kind,
        repo: repo.clone(),
        build: build.clone(),
    };
    let data = match serde_json::to_vec(&event) {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!(repo = %repo.full_name, build = build.number, "Cannot encode build event: {}", err);
            return;
        }
    };

    let message = Message {
        labels: HashMap::from([
            ("repo".to_string(), repo.full_name.clone()),
            ("private".to_string(), repo.private.to_string()),
        ]),
        data,
    };
    let delivered = bus.publish(EVENTS_TOPIC, message);

    tracing::debug!(
        repo = %repo.full_name,
        build = build.number,
        event = ?kind,
        delivered,
        "Published build event"
    );
}
