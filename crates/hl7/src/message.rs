//! Message shape assembly.
//!
//! Groups the flat segment sequence of one message into a [`Header`], exactly one
//! [`PatientGroup`] and zero or more [`OrderGroup`]s in encounter order. Note, participant and
//! observation segments belong to whichever group was last significant when they appear.

use crate::tree::{ElementTree, Segment};
use crate::{Delimiters, Hl7Error, Hl7Result};

/// The routing header of a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub msh: Segment,
    pub extra: Vec<Segment>,
}

impl Header {
    /// Best-effort header recovery for messages that fail to parse as a whole.
    ///
    /// Used to address a NAK back to the sender; every accessor returns an empty string if
    /// nothing can be salvaged.
    pub fn salvage(text: &str) -> Self {
        let Some(start) = text.find("MSH") else {
            return Self::default();
        };
        let line = text[start..]
            .split(['\r', '\n'])
            .next()
            .unwrap_or_default();

        match ElementTree::parse(line) {
            Ok(tree) => Self {
                msh: tree.into_segments().into_iter().next().unwrap_or_default(),
                extra: Vec::new(),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn sending_application(&self) -> &str {
        self.msh.get("MSH.3.1")
    }

    pub fn sending_facility(&self) -> &str {
        self.msh.get("MSH.4.1")
    }

    pub fn receiving_application(&self) -> &str {
        self.msh.get("MSH.5.1")
    }

    pub fn receiving_facility(&self) -> &str {
        self.msh.get("MSH.6.1")
    }

    pub fn timestamp(&self) -> &str {
        self.msh.get("MSH.7.1")
    }

    pub fn message_type(&self) -> &str {
        self.msh.get("MSH.9.1")
    }

    pub fn trigger_event(&self) -> &str {
        self.msh.get("MSH.9.2")
    }

    pub fn control_id(&self) -> &str {
        self.msh.get("MSH.10")
    }

    pub fn processing_id(&self) -> &str {
        self.msh.get("MSH.11.1")
    }

    pub fn version_id(&self) -> &str {
        self.msh.get("MSH.12.1")
    }

    /// Raw field text, still delimited, for copying into a reply.
    pub fn raw_field(&self, field: usize) -> &str {
        self.msh.get(&format!("MSH.{field}"))
    }
}

/// Patient-level segments: demographics, visit, insurance and clinical lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatientGroup {
    pub pid: Option<Segment>,
    pub pd1: Option<Segment>,
    pub pv1: Option<Segment>,
    pub pv2: Option<Segment>,
    pub insurance: Vec<Segment>,
    pub allergies: Vec<Segment>,
    pub diagnoses: Vec<Segment>,
    pub notes: Vec<Segment>,
    pub participants: Vec<Segment>,
    pub observations: Vec<Segment>,
    pub extra: Vec<Segment>,
}

impl PatientGroup {
    /// Value at `path` from whichever single patient segment owns that tag.
    pub fn get(&self, path: &str) -> &str {
        let name = path.split('.').next().unwrap_or_default().to_ascii_uppercase();
        let segment = match name.as_str() {
            "PID" => self.pid.as_ref(),
            "PD1" => self.pd1.as_ref(),
            "PV1" => self.pv1.as_ref(),
            "PV2" => self.pv2.as_ref(),
            _ => None,
        };
        segment.map(|s| s.get(path)).unwrap_or("")
    }
}

/// One medication order repeat-group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderGroup {
    /// The order-control segment (`ORC`). Absent only for tolerated, malformed input.
    pub control: Option<Segment>,
    /// Encoded pharmacy order detail (`RXE`).
    pub encoded: Option<Segment>,
    /// Literal pharmacy order detail (`RXO`).
    pub literal: Option<Segment>,
    /// Dispense detail (`RXD`).
    pub dispense: Option<Segment>,
    pub timing: Vec<Segment>,
    pub routes: Vec<Segment>,
    pub components: Vec<Segment>,
    pub notes: Vec<Segment>,
    pub participants: Vec<Segment>,
    pub observations: Vec<Segment>,
    pub extra: Vec<Segment>,
}

impl OrderGroup {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Order control code (`ORC.1`), upper-cased.
    pub fn control_code(&self) -> String {
        self.control
            .as_ref()
            .map(|s| s.get("ORC.1").trim().to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Value at `path` from the single order segment that owns that tag.
    pub fn get(&self, path: &str) -> &str {
        let name = path.split('.').next().unwrap_or_default().to_ascii_uppercase();
        let segment = match name.as_str() {
            "ORC" => self.control.as_ref(),
            "RXE" => self.encoded.as_ref(),
            "RXO" => self.literal.as_ref(),
            "RXD" => self.dispense.as_ref(),
            "RXR" => self.routes.first(),
            "TQ1" => self.timing.iter().find(|s| s.name() == "TQ1"),
            _ => None,
        };
        segment.map(|s| s.get(path)).unwrap_or("")
    }
}

/// Which aggregate shapes a message type may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageShape {
    /// Patient administration only; order segments are not allowed.
    PatientOnly,
    /// Patient aggregate followed by repeating order groups.
    PatientWithOrders,
}

impl MessageShape {
    pub fn for_message_type(message_type: &str) -> Hl7Result<Self> {
        match message_type.trim().to_ascii_uppercase().as_str() {
            "ADT" => Ok(Self::PatientOnly),
            "RDE" | "OMP" | "RDS" | "ORM" | "RRE" => Ok(Self::PatientWithOrders),
            other => Err(Hl7Error::UnsupportedMessageShape(format!(
                "message type '{}' is not supported",
                other
            ))),
        }
    }
}

/// A fully assembled inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub delimiters: Delimiters,
    pub shape: MessageShape,
    pub header: Header,
    pub patient: PatientGroup,
    pub orders: Vec<OrderGroup>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Significant {
    Patient,
    Order,
}

enum Kind {
    Header,
    Batch,
    Patient,
    OrderControl,
    Order,
    Following,
    Other,
}

fn classify(name: &str) -> Kind {
    match name {
        "MSH" | "EVN" | "SFT" | "UAC" => Kind::Header,
        "FHS" | "BHS" | "BTS" | "FTS" => Kind::Batch,
        "PID" | "PD1" | "PV1" | "PV2" | "IN1" | "IN2" | "IN3" | "GT1" | "AL1" | "IAM"
        | "DG1" | "NK1" => Kind::Patient,
        "ORC" => Kind::OrderControl,
        "RXE" | "RXO" | "RXD" | "TQ1" | "TQ2" | "RXR" | "RXC" => Kind::Order,
        "NTE" | "ROL" | "PRT" | "OBX" => Kind::Following,
        _ => Kind::Other,
    }
}

impl Message {
    /// Assembles the segments of a parsed tree into message aggregates.
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::UnsupportedMessageShape`] for unsupported message types, batches
    /// with more than one message, or order segments in a patient-only message.
    pub fn assemble(tree: ElementTree) -> Hl7Result<Self> {
        let delimiters = *tree.delimiters();
        let mut header = Header::default();
        let mut patient = PatientGroup::default();
        let mut orders = Vec::new();
        let mut current: Option<OrderGroup> = None;
        let mut last = Significant::Patient;
        let mut headers_seen = 0usize;

        for segment in tree.into_segments() {
            let name = segment.name().to_string();
            match classify(&name) {
                Kind::Batch => {}
                Kind::Header if name == "MSH" => {
                    headers_seen += 1;
                    if headers_seen > 1 {
                        return Err(Hl7Error::UnsupportedMessageShape(
                            "batch contains more than one message".into(),
                        ));
                    }
                    header.msh = segment;
                }
                Kind::Header => header.extra.push(segment),
                Kind::Patient => {
                    last = Significant::Patient;
                    fold_patient(&mut patient, segment);
                }
                Kind::OrderControl => {
                    last = Significant::Order;
                    if let Some(order) = current.take() {
                        if !order.is_empty() {
                            orders.push(order);
                        }
                    }
                    current = Some(OrderGroup {
                        control: Some(segment),
                        ..OrderGroup::default()
                    });
                }
                Kind::Order => {
                    last = Significant::Order;
                    let order = current.get_or_insert_with(|| {
                        tracing::warn!(segment = %name, "order detail before any ORC; opening implicit order");
                        OrderGroup::default()
                    });
                    fold_order(order, segment);
                }
                Kind::Following => match (last, current.as_mut()) {
                    (Significant::Order, Some(order)) => fold_order(order, segment),
                    _ => fold_patient(&mut patient, segment),
                },
                Kind::Other => match (last, current.as_mut()) {
                    (Significant::Order, Some(order)) => order.extra.push(segment),
                    _ => patient.extra.push(segment),
                },
            }
        }

        if let Some(order) = current.take() {
            if !order.is_empty() {
                orders.push(order);
            }
        }

        let shape = MessageShape::for_message_type(header.message_type())?;
        if shape == MessageShape::PatientOnly && !orders.is_empty() {
            return Err(Hl7Error::UnsupportedMessageShape(format!(
                "{} message carries {} order group(s)",
                header.message_type(),
                orders.len()
            )));
        }

        tracing::debug!(
            message_type = header.message_type(),
            orders = orders.len(),
            "assembled message"
        );

        Ok(Self {
            delimiters,
            shape,
            header,
            patient,
            orders,
        })
    }

    /// Parses and assembles raw message text.
    pub fn parse(text: &str) -> Hl7Result<Self> {
        Self::assemble(ElementTree::parse(text)?)
    }
}

fn fold_patient(patient: &mut PatientGroup, segment: Segment) {
    match segment.name() {
        "PID" => set_once(&mut patient.pid, segment),
        "PD1" => set_once(&mut patient.pd1, segment),
        "PV1" => set_once(&mut patient.pv1, segment),
        "PV2" => set_once(&mut patient.pv2, segment),
        "IN1" | "IN2" | "IN3" | "GT1" => patient.insurance.push(segment),
        "AL1" | "IAM" => patient.allergies.push(segment),
        "DG1" => patient.diagnoses.push(segment),
        "NTE" => patient.notes.push(segment),
        "ROL" | "PRT" | "NK1" => patient.participants.push(segment),
        "OBX" => patient.observations.push(segment),
        _ => patient.extra.push(segment),
    }
}

fn fold_order(order: &mut OrderGroup, segment: Segment) {
    match segment.name() {
        "RXE" => set_once(&mut order.encoded, segment),
        "RXO" => set_once(&mut order.literal, segment),
        "RXD" => set_once(&mut order.dispense, segment),
        "TQ1" | "TQ2" => order.timing.push(segment),
        "RXR" => order.routes.push(segment),
        "RXC" => order.components.push(segment),
        "NTE" => order.notes.push(segment),
        "ROL" | "PRT" => order.participants.push(segment),
        "OBX" => order.observations.push(segment),
        _ => order.extra.push(segment),
    }
}

/// Keeps the first occurrence of a single-valued segment; repeats are tolerated and logged.
fn set_once(slot: &mut Option<Segment>, segment: Segment) {
    if slot.is_some() {
        tracing::warn!(segment = segment.name(), "repeated segment ignored");
        return;
    }
    *slot = Some(segment);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSH_RDE: &str = "MSH|^~\\&|FWLTC|NH01|RX|STORE1|20240101120000||RDE^O11|MSG001|P|2.5";

    fn parse(body: &str) -> Message {
        Message::parse(&format!("{MSH_RDE}\r{body}")).expect("assemble")
    }

    #[test]
    fn header_accessors_read_routing_fields() {
        let msg = parse("PID|1||123");
        assert_eq!(msg.header.sending_application(), "FWLTC");
        assert_eq!(msg.header.sending_facility(), "NH01");
        assert_eq!(msg.header.receiving_application(), "RX");
        assert_eq!(msg.header.receiving_facility(), "STORE1");
        assert_eq!(msg.header.message_type(), "RDE");
        assert_eq!(msg.header.trigger_event(), "O11");
        assert_eq!(msg.header.control_id(), "MSG001");
        assert_eq!(msg.header.version_id(), "2.5");
    }

    #[test]
    fn order_control_opens_new_groups_and_last_group_is_kept() {
        let msg = parse(
            "PID|1||123\rPV1|1|I\rORC|NW|P1\rRXE|1|00093^DRUG A\rTQ1|1|1|BID\r\
             ORC|NW|P2\rRXE|1|00094^DRUG B\rRXR|PO",
        );
        assert!(msg.patient.pid.is_some());
        assert!(msg.patient.pv1.is_some());
        assert_eq!(msg.orders.len(), 2);
        assert_eq!(msg.orders[0].control_code(), "NW");
        assert_eq!(msg.orders[0].get("RXE.2.2"), "DRUG A");
        assert_eq!(msg.orders[0].timing.len(), 1);
        assert_eq!(msg.orders[1].get("ORC.2"), "P2");
        assert_eq!(msg.orders[1].routes.len(), 1);
    }

    #[test]
    fn notes_follow_last_significant_segment() {
        let msg = parse(
            "PID|1||123\rNTE|1||patient note\rAL1|1||PCN\rORC|NW|P1\rNTE|1||order note\r\
             RXE|1|X\rNTE|2||second order note\rROL|1|AD|PP|DR\rDG1|1||I10",
        );
        assert_eq!(msg.patient.notes.len(), 1);
        assert_eq!(msg.patient.notes[0].get("NTE.3"), "patient note");
        assert_eq!(msg.patient.allergies.len(), 1);
        assert_eq!(msg.orders[0].notes.len(), 2);
        assert_eq!(msg.orders[0].participants.len(), 1);
        // DG1 is patient-level even inside an order group.
        assert_eq!(msg.patient.diagnoses.len(), 1);
    }

    #[test]
    fn note_after_patient_segment_inside_orders_goes_to_patient() {
        let msg = parse("ORC|NW|P1\rRXE|1|X\rAL1|1||PCN\rNTE|1||allergy note");
        assert_eq!(msg.patient.notes.len(), 1);
        assert!(msg.orders[0].notes.is_empty());
    }

    #[test]
    fn order_detail_without_control_opens_implicit_order() {
        let msg = parse("PID|1||123\rRXE|1|X\rORC|NW|P2\rRXE|1|Y");
        assert_eq!(msg.orders.len(), 2);
        assert!(msg.orders[0].control.is_none());
        assert_eq!(msg.orders[1].control_code(), "NW");
    }

    #[test]
    fn message_without_orders_has_empty_order_list() {
        let msg = parse("PID|1||123");
        assert!(msg.orders.is_empty());
        assert_eq!(msg.shape, MessageShape::PatientWithOrders);
    }

    #[test]
    fn rejects_unsupported_message_type() {
        let err = Message::parse("MSH|^~\\&|A|B|C|D|1||ORU^R01|1|P|2.5\rPID|1")
            .expect_err("ORU is not handled");
        assert!(matches!(err, Hl7Error::UnsupportedMessageShape(msg) if msg.contains("ORU")));
    }

    #[test]
    fn rejects_orders_in_patient_only_message() {
        let err = Message::parse("MSH|^~\\&|A|B|C|D|1||ADT^A08|1|P|2.5\rPID|1\rORC|NW|1")
            .expect_err("ADT with orders");
        assert!(matches!(err, Hl7Error::UnsupportedMessageShape(_)));
    }

    #[test]
    fn salvages_header_from_garbage() {
        let header = Header::salvage("junk\rMSH|^~\\&|APP|FAC|||1||RDE^O11|C9|P|2.5\rPID|");
        assert_eq!(header.sending_application(), "APP");
        assert_eq!(header.control_id(), "C9");
        assert_eq!(Header::salvage("nothing here"), Header::default());
    }
}
