//! Shared test messages and fakes.

use rxbridge_transport::{Response, Transport, TransportResult};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Builds a non-header segment with values at explicit field positions.
pub fn seg(name: &str, fields: &[(usize, &str)]) -> String {
    let last = fields.iter().map(|(i, _)| *i).max().unwrap_or(0);
    let mut parts = vec![String::new(); last + 1];
    parts[0] = name.to_string();
    for (i, value) in fields {
        parts[*i] = value.to_string();
    }
    parts.join("|")
}

/// A single-order RDE^O11 that transforms into one record of every kind.
pub fn order_message(control_id: &str, control: &str) -> String {
    [
        format!("MSH|^~\\&|EHR|NH01|RX|STORE1^Main Street Pharmacy|20240105083000||RDE^O11|{control_id}|P|2.5|"),
        seg("PID", &[(1, "1"), (3, "P123"), (5, "DOE^JANE"), (7, "19400102"), (8, "F")]),
        seg("PV1", &[(2, "I"), (3, "WEST^12^B^NH01")]),
        seg("ORC", &[(1, control), (2, "RX1001"), (9, "20240105"), (12, "DR9^SMITH^JOHN")]),
        seg(
            "RXE",
            &[
                (2, "00093015001^Lisinopril 10mg^NDC"),
                (7, "^Take one daily"),
                (10, "30"),
                (13, "AB1234567"),
            ],
        ),
        seg("TQ1", &[(1, "1"), (2, "1"), (3, "QD"), (4, "0900"), (7, "20240105")]),
    ]
    .join("\r")
}

/// A gateway fake that records payloads and answers from a script, then with `0x06`.
#[derive(Default)]
pub struct ScriptedGateway {
    written: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<TransportResult<Vec<u8>>>>,
}

impl ScriptedGateway {
    pub fn replying(replies: Vec<TransportResult<Vec<u8>>>) -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        }
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().expect("lock").clone()
    }
}

impl Transport for ScriptedGateway {
    fn write(&self, payload: &str) -> TransportResult<Response> {
        self.written.lock().expect("lock").push(payload.to_string());
        let bytes = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(vec![0x06]))?;
        Ok(Response {
            accepted: !bytes.is_empty(),
            bytes,
        })
    }
}
