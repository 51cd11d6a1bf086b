//! Segment-to-record transformation.
//!
//! One assembled [`Message`] becomes the record set written to the gateway:
//! - message level: Store, Facility and Patient
//! - per order: Prescriber, Drug, TimesQtys and Prescription, plus a duplicate Prescription
//!   for replacement orders
//!
//! Orders are transformed in encounter order; the first failing order aborts the whole message.

use crate::collaborators::{GuidStore, IdAllocator};
use crate::config::CoreConfig;
use crate::dialect::{Dialect, Layout, PatientIdLayout, UNKNOWN_PATIENT_ID};
use crate::schedule::{self, ScheduleRequest};
use crate::{dea, EngineResult};
use gateway::{Operation, Record, RecordKind, WriteQueue};
use hl7::{Message, MessageShape, OrderGroup, PatientGroup, Segment};
use std::sync::Arc;

/// Record status codes.
pub const STATUS_ACTIVE: &str = "A";
pub const STATUS_DISCONTINUED: &str = "D";

/// What an order-control code asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderAction {
    /// `NW`
    New,
    /// `RF`
    Refill,
    /// `DC`
    Discontinue,
    /// `XO` and `CA`: close the prior prescription and re-issue it under a new number.
    Replace,
    /// Anything else, sent as a change.
    Other,
}

impl OrderAction {
    pub fn from_control(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "NW" => OrderAction::New,
            "RF" => OrderAction::Refill,
            "DC" => OrderAction::Discontinue,
            "XO" | "CA" => OrderAction::Replace,
            _ => OrderAction::Other,
        }
    }

    fn operation(&self) -> Operation {
        match self {
            OrderAction::New => Operation::Add,
            _ => Operation::Change,
        }
    }
}

/// Rule switches taken from [`CoreConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformOptions {
    pub strong_dea: bool,
    pub allow_zero_dose: bool,
    pub auto_truncate: bool,
    /// Store id used when the message names no receiving facility.
    pub default_store: String,
}

impl From<&CoreConfig> for TransformOptions {
    fn from(config: &CoreConfig) -> Self {
        Self {
            strong_dea: config.strong_dea,
            allow_zero_dose: config.allow_zero_dose,
            auto_truncate: config.auto_truncate,
            default_store: config.facility.clone(),
        }
    }
}

/// Identifiers resolved once per message.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Context {
    layout: Layout,
    store_id: String,
    facility_id: String,
    patient_id: String,
    today: String,
}

pub struct Transformer {
    options: TransformOptions,
    ids: Arc<dyn IdAllocator>,
    guids: Arc<dyn GuidStore>,
}

impl Transformer {
    pub fn new(
        options: TransformOptions,
        ids: Arc<dyn IdAllocator>,
        guids: Arc<dyn GuidStore>,
    ) -> Self {
        Self {
            options,
            ids,
            guids,
        }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Builds every record for `message` under `dialect`.
    ///
    /// # Errors
    ///
    /// Field, DEA and dose-schedule violations, and record overflow on key identifiers.
    pub fn transform(&self, message: &Message, dialect: Dialect) -> EngineResult<Vec<Record>> {
        let context = self.context(message, dialect);
        tracing::debug!(
            dialect = %dialect,
            facility = %context.facility_id,
            patient = %context.patient_id,
            orders = message.orders.len(),
            "transforming message"
        );

        let mut records = vec![self.store(message, &context)?, self.facility(message, &context)?];

        match message.shape {
            MessageShape::PatientOnly => {
                records.push(self.admission(message, &context)?);
            }
            MessageShape::PatientWithOrders => {
                records.push(self.patient(&message.patient, Operation::Add, &context)?);
                for (index, order) in message.orders.iter().enumerate() {
                    let order_records = self.order(order, &context).map_err(|e| {
                        tracing::error!(order = index + 1, error = %e, "order transformation failed");
                        e
                    })?;
                    records.extend(order_records);
                }
            }
        }
        Ok(records)
    }

    /// Detects the dialect, transforms `message` and queues every non-empty record.
    pub fn translate(&self, message: &Message) -> EngineResult<WriteQueue> {
        let dialect = Dialect::detect(&message.header);
        let mut queue = WriteQueue::new();
        for mut record in self.transform(message, dialect)? {
            queue.enqueue(&mut record)?;
        }
        Ok(queue)
    }

    fn record(&self, kind: RecordKind, operation: Operation) -> Record {
        Record::new(kind, operation).with_auto_truncate(self.options.auto_truncate)
    }

    fn context(&self, message: &Message, dialect: Dialect) -> Context {
        let layout = dialect.layout();
        let patient = &message.patient;

        let (patient_id, embedded_facility) = match layout.patient_id {
            PatientIdLayout::Paths(paths) => (first_of(paths, |p| patient.get(p)), String::new()),
            PatientIdLayout::Combined { patient: p, facility } => {
                (clean(patient.get(p)), clean(patient.get(facility)))
            }
        };
        let patient_id = if patient_id.is_empty() {
            tracing::warn!(dialect = %dialect, "no patient identifier found; using sentinel");
            UNKNOWN_PATIENT_ID.to_string()
        } else {
            patient_id
        };

        let facility_id = Some(embedded_facility)
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| first_of(layout.facility_paths, |p| patient.get(p)));
        let facility_id = if facility_id.is_empty() {
            clean(message.header.sending_facility())
        } else {
            facility_id
        };

        let store_id = clean(message.header.receiving_facility());
        let store_id = if store_id.is_empty() {
            self.options.default_store.clone()
        } else {
            store_id
        };

        Context {
            layout,
            store_id,
            facility_id,
            patient_id,
            today: today(),
        }
    }

    fn store(&self, message: &Message, context: &Context) -> EngineResult<Record> {
        let mut store = self.record(RecordKind::Store, Operation::Add);
        store.set("StoreID", &context.store_id)?;
        let name = clean(message.header.msh.get("MSH.6.2"));
        store.set(
            "StoreName",
            if name.is_empty() { &context.store_id } else { &name },
        )?;
        Ok(store)
    }

    fn facility(&self, message: &Message, context: &Context) -> EngineResult<Record> {
        let mut facility = self.record(RecordKind::Facility, Operation::Add);
        facility.set("FacilityID", &context.facility_id)?;
        let name = clean(message.patient.get("PV1.3.9"));
        facility.set(
            "FacilityName",
            if name.is_empty() { &context.facility_id } else { &name },
        )?;
        facility.set("StoreID", &context.store_id)?;
        Ok(facility)
    }

    fn admission(&self, message: &Message, context: &Context) -> EngineResult<Record> {
        let event = message.header.trigger_event().trim().to_ascii_uppercase();
        let operation = match event.as_str() {
            "A01" | "A04" | "A28" => Operation::Add,
            "A08" | "A31" | "A03" => Operation::Change,
            other => {
                tracing::warn!(event = other, "unrecognised ADT event; sending patient change");
                Operation::Change
            }
        };

        let mut patient = self.patient(&message.patient, operation, context)?;
        if event == "A03" {
            let discharged = date(message.patient.get("PV1.45"));
            patient.set(
                "DischargeDate",
                if discharged.is_empty() { &context.today } else { &discharged },
            )?;
            patient.set("Status", STATUS_DISCONTINUED)?;
        }
        Ok(patient)
    }

    fn patient(
        &self,
        group: &PatientGroup,
        operation: Operation,
        context: &Context,
    ) -> EngineResult<Record> {
        let mut patient = self.record(RecordKind::Patient, operation);
        patient.set("FacilityID", &context.facility_id)?;
        patient.set_field("PatientID", &context.patient_id, true)?;

        let get = |path: &str| clean(group.get(path));
        patient.set("LastName", get("PID.5.1"))?;
        patient.set("FirstName", get("PID.5.2"))?;
        patient.set("MiddleName", get("PID.5.3"))?;
        patient.set("BirthDate", date(group.get("PID.7")))?;
        patient.set("Sex", get("PID.8").chars().take(1).collect::<String>())?;
        patient.set("SSN", digits(group.get("PID.19")))?;
        patient.set("Address1", get("PID.11.1"))?;
        patient.set("Address2", get("PID.11.2"))?;
        patient.set("City", get("PID.11.3"))?;
        patient.set("State", get("PID.11.4"))?;
        patient.set("Zip", get("PID.11.5"))?;
        patient.set("Phone", get("PID.13.1"))?;
        patient.set("Wing", get("PV1.3.1"))?;
        patient.set("Room", get("PV1.3.2"))?;
        patient.set("Bed", get("PV1.3.3"))?;
        patient.set("AdmitDate", date(group.get("PV1.44")))?;
        patient.set("DischargeDate", date(group.get("PV1.45")))?;
        if operation == Operation::Add {
            patient.set("Status", STATUS_ACTIVE)?;
        }

        let allergies = described(&group.allergies, "AL1.3");
        patient.set("Allergies", allergies.join(", "))?;
        let diagnoses = described(&group.diagnoses, "DG1.3");
        patient.set("Diagnoses", diagnoses.join(", "))?;

        if let Some(insurance) = group.insurance.first() {
            patient.set("InsuranceCarrier", clean(insurance.get("IN1.4.1")))?;
            patient.set("PolicyNumber", clean(insurance.get("IN1.36")))?;
            patient.set("GroupNumber", clean(insurance.get("IN1.8")))?;
        }
        for note in notes(&group.notes) {
            patient.annotate(note);
        }
        Ok(patient)
    }

    fn order(&self, order: &OrderGroup, context: &Context) -> EngineResult<Vec<Record>> {
        let action = OrderAction::from_control(&order.control_code());
        if action == OrderAction::Other {
            tracing::warn!(control = %order.control_code(), "unrecognised order control; sending change");
        }

        let mut records = Vec::with_capacity(5);
        let prescriber = self.prescriber(order, context)?;
        let prescriber_id = prescriber.get("PrescriberID").unwrap_or_default().to_string();
        records.push(prescriber);

        let drug = self.drug(order)?;
        let drug_id = drug.get("DrugID").unwrap_or_default().to_string();
        records.push(drug);

        let mut rx = self.record(RecordKind::Prescription, action.operation());
        if self.options.allow_zero_dose {
            rx.allow_zero_quantity();
        }
        if action == OrderAction::Discontinue {
            rx.relax_dose_timing();
            rx.allow_zero_quantity();
        }

        let rx_number = first_of(context.layout.rx_number_paths, |p| order.get(p));
        rx.set_field("RxNumber", &rx_number, true)?;
        rx.set("FacilityID", &context.facility_id)?;
        rx.set_field("PatientID", &context.patient_id, true)?;
        rx.set("PrescriberID", &prescriber_id)?;
        rx.set("DrugID", &drug_id)?;
        rx.set("Quantity", clean(order.get("RXE.10")))?;
        rx.set("Refills", clean(order.get("RXE.12")))?;
        rx.set("Route", clean(order.get("RXR.1.1")))?;
        rx.set("Sig", sig(order))?;

        let timing = Timing::from_order(order);
        let start = Some(date(&timing.start))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| context.today.clone());
        rx.set("StartDate", &start)?;
        rx.set("StopDate", date(&timing.end))?;

        if timing.is_present() {
            let decoded = schedule::decode(&ScheduleRequest {
                pattern: &timing.pattern,
                quantity: timing.quantity,
                times: timing.times.clone(),
                first_day_of_week: context.layout.first_day_of_week,
                allow_zero_quantity: rx.zero_quantity_allowed(),
            })?;

            let mut tq = self.record(RecordKind::TimesQtys, Operation::Add);
            tq.set("TQCode", &decoded.code)?;
            let description = if timing.description.is_empty() {
                &decoded.code
            } else {
                &timing.description
            };
            tq.set("Description", description)?;
            tq.set("DoseScheduleType", decoded.schedule_type.to_string())?;
            tq.set("DoseTimesQtys", &decoded.dose_times_qtys)?;
            tq.set("DaysOfWeek", &decoded.days_of_week)?;
            let offset = decoded.start_offset.map(|n| n.to_string()).unwrap_or_default();
            tq.set("StartOffset", &offset)?;
            records.push(tq);

            rx.set("TQCode", &decoded.code)?;
            rx.set("DoseScheduleType", decoded.schedule_type.to_string())?;
            rx.set("DoseTimesQtys", &decoded.dose_times_qtys)?;
            rx.set("DaysOfWeek", &decoded.days_of_week)?;
            rx.set("StartOffset", &offset)?;
            rx.set("PRN", if decoded.prn { "Y" } else { "N" })?;
        }

        for note in notes(&order.notes) {
            rx.annotate(note);
        }
        for component in &order.components {
            let name = first_present(&[component.get("RXC.2.2"), component.get("RXC.2.1")]);
            let amount = clean(component.get("RXC.3"));
            let unit = clean(component.get("RXC.4.1"));
            rx.annotate(format!("Compound: {name} {amount}{unit}"));
        }
        for observation in &order.observations {
            let label = first_present(&[observation.get("OBX.3.2"), observation.get("OBX.3.1")]);
            let value = clean(observation.get("OBX.5"));
            let unit = clean(observation.get("OBX.6.1"));
            rx.annotate(format!("{label}: {value}{unit}"));
        }

        match action {
            OrderAction::Discontinue => {
                let stopped =
                    first_present(&[date(order.get("ORC.15")).as_str(), date(&timing.end).as_str()]);
                let stopped = if stopped.is_empty() { context.today.clone() } else { stopped };
                rx.set("DiscontinueDate", &stopped)?;
                rx.set("Status", STATUS_DISCONTINUED)?;
                records.push(rx);
            }
            OrderAction::Replace => {
                let duplicate = self.duplicate(&rx, &rx_number, context)?;
                rx.set("DiscontinueDate", &context.today)?;
                rx.set("Status", STATUS_DISCONTINUED)?;
                records.push(rx);
                records.push(duplicate);
            }
            _ => {
                rx.set("Status", STATUS_ACTIVE)?;
                records.push(rx);
            }
        }
        Ok(records)
    }

    /// Re-issues `original` under a freshly allocated number starting today.
    fn duplicate(&self, original: &Record, rx_number: &str, context: &Context) -> EngineResult<Record> {
        let (id, guid) = self.ids.allocate();
        self.guids.record(&id, &guid)?;
        tracing::info!(original = rx_number, duplicate = %id, "duplicating prescription for replacement order");

        let mut duplicate = original.clone();
        duplicate.set_operation(Operation::Add);
        duplicate.set_field("RxNumber", &id, true)?;
        duplicate.set("OriginalRxNumber", rx_number)?;
        duplicate.set("StartDate", &context.today)?;
        duplicate.set("StopDate", "")?;
        duplicate.set("DiscontinueDate", "")?;
        duplicate.set("Status", STATUS_ACTIVE)?;
        Ok(duplicate)
    }

    fn prescriber(&self, order: &OrderGroup, context: &Context) -> EngineResult<Record> {
        let path = context.layout.prescriber;
        let component = |n: u8| clean(order.get(&format!("{path}.{n}")));

        let mut prescriber = self.record(RecordKind::Prescriber, Operation::Add);
        let id = component(1);
        prescriber.set("PrescriberID", &id)?;
        if id.is_empty() {
            return Ok(prescriber);
        }
        prescriber.set("LastName", component(2))?;
        prescriber.set("FirstName", component(3))?;
        prescriber.set("MiddleInitial", component(4).chars().take(1).collect::<String>())?;
        if component(13).eq_ignore_ascii_case("NPI") {
            prescriber.set("NPI", &id)?;
        }
        let dea = dea::normalize(order.get("RXE.13.1"), self.options.strong_dea)?;
        prescriber.set("DEA", &dea)?;
        Ok(prescriber)
    }

    fn drug(&self, order: &OrderGroup) -> EngineResult<Record> {
        let mut drug = self.record(RecordKind::Drug, Operation::Add);
        let (id, name) = if order.encoded.is_some() {
            (order.get("RXE.2.1"), order.get("RXE.2.2"))
        } else {
            (order.get("RXO.1.1"), order.get("RXO.1.2"))
        };
        let ndc = digits(id);
        let id = if ndc.is_empty() { clean(id) } else { ndc };
        drug.set("DrugID", &id)?;
        if id.is_empty() {
            return Ok(drug);
        }
        drug.set("DrugName", clean(name))?;
        drug.set("Strength", clean(order.get("RXE.25")))?;
        drug.set("StrengthUnit", clean(order.get("RXE.26.1")))?;
        drug.set("DosageForm", clean(order.get("RXE.6.1")))?;
        drug.set("Route", clean(order.get("RXR.1.1")))?;
        Ok(drug)
    }
}

/// Timing detail from `TQ1` segments, or the legacy `ORC.7`/`RXE.1` quantity/timing field.
#[derive(Clone, Debug, Default, PartialEq)]
struct Timing {
    pattern: String,
    description: String,
    quantity: Option<f64>,
    times: Vec<String>,
    start: String,
    end: String,
}

impl Timing {
    fn from_order(order: &OrderGroup) -> Self {
        let tq1: Vec<&Segment> = order.timing.iter().filter(|s| s.name() == "TQ1").collect();
        let fallback_quantity = parse_quantity(order.get("RXE.3"));

        if let Some(first) = tq1.first() {
            return Self {
                pattern: clean(first.get("TQ1.3.1")),
                description: clean(first.get("TQ1.3.2")),
                quantity: parse_quantity(first.get("TQ1.2.1")).or(fallback_quantity),
                times: tq1
                    .iter()
                    .flat_map(|s| s.get_list("TQ1.4"))
                    .map(clean)
                    .filter(|t| !t.is_empty())
                    .collect(),
                start: first.get("TQ1.7").to_string(),
                end: first.get("TQ1.8").to_string(),
            };
        }

        let legacy = ["ORC.7", "RXE.1"]
            .into_iter()
            .find(|path| !order.get(path).trim().is_empty())
            .unwrap_or("ORC.7");
        let part = |suffix: &str| order.get(&format!("{legacy}.{suffix}")).to_string();
        let explicit_times = part("2.2");
        let times = explicit_times
            .split(',')
            .map(clean)
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            pattern: clean(&part("2.1")),
            description: String::new(),
            quantity: parse_quantity(&part("1.1")).or(fallback_quantity),
            times,
            start: part("4"),
            end: part("5"),
        }
    }

    fn is_present(&self) -> bool {
        !self.pattern.is_empty() || !self.times.is_empty()
    }
}

fn sig(order: &OrderGroup) -> String {
    first_present(&[order.get("RXE.7.2"), order.get("RXE.21"), order.get("TQ1.11")])
}

fn notes(segments: &[Segment]) -> Vec<String> {
    segments
        .iter()
        .filter(|s| s.name() == "NTE")
        .flat_map(|s| s.get_list("NTE.3"))
        .map(clean)
        .filter(|n| !n.is_empty())
        .collect()
}

/// Description of each coded entry at `path`, falling back to its code.
fn described(segments: &[Segment], path: &str) -> Vec<String> {
    segments
        .iter()
        .map(|s| first_present(&[s.get(&format!("{path}.2")), s.get(&format!("{path}.1"))]))
        .filter(|d| !d.is_empty())
        .collect()
}

fn first_of<'a>(paths: &[&str], get: impl Fn(&str) -> &'a str) -> String {
    first_present(&paths.iter().map(|p| get(p)).collect::<Vec<_>>())
}

fn first_present(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| clean(v))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn clean(value: &str) -> String {
    value.trim().to_string()
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// `YYYYMMDD` from an HL7 timestamp; empty when there are fewer than eight digits.
fn date(value: &str) -> String {
    let digits = digits(value);
    if digits.len() >= 8 {
        digits[..8].to_string()
    } else {
        String::new()
    }
}

fn parse_quantity(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryGuidStore;
    use crate::fixtures::seg;
    use crate::EngineError;

    struct FixedIds;

    impl IdAllocator for FixedIds {
        fn allocate(&self) -> (String, String) {
            ("ABCDEF012345".into(), "guid-dup".into())
        }
    }

    fn transformer(guids: Arc<MemoryGuidStore>) -> Transformer {
        Transformer::new(
            TransformOptions {
                strong_dea: true,
                allow_zero_dose: false,
                auto_truncate: false,
                default_store: "PHARMACY".into(),
            },
            Arc::new(FixedIds),
            guids,
        )
    }

    fn msh(app: &str, message_type: &str) -> String {
        format!("MSH|^~\\&|{app}|NH01|RX|STORE1^Main Street Pharmacy|20240105083000||{message_type}|CTL1|P|2.5|")
    }

    fn pid() -> String {
        seg(
            "PID",
            &[
                (1, "1"),
                (3, "P123"),
                (5, "DOE^JANE^Q"),
                (7, "19400102"),
                (8, "F"),
                (11, "1 Main St^^Salem^OR^97301"),
                (13, "5035550100"),
            ],
        )
    }

    fn orc(control: &str) -> String {
        seg(
            "ORC",
            &[
                (1, control),
                (2, "RX1001"),
                (9, "20240105"),
                (12, "DR9^SMITH^JOHN^A"),
                (15, "20240110"),
            ],
        )
    }

    fn rxe(dea: &str) -> String {
        seg(
            "RXE",
            &[
                (2, "00093015001^Lisinopril 10mg^NDC"),
                (6, "TAB"),
                (7, "^Take one daily"),
                (10, "30"),
                (12, "2"),
                (13, dea),
                (25, "10"),
                (26, "mg"),
            ],
        )
    }

    fn tq1(quantity: &str, pattern: &str, times: &str) -> String {
        seg(
            "TQ1",
            &[(1, "1"), (2, quantity), (3, pattern), (4, times), (7, "20240105")],
        )
    }

    fn rde(app: &str, pid: &str, orc: &str, rest: &[String]) -> Message {
        let mut lines = vec![
            msh(app, "RDE^O11"),
            pid.to_string(),
            seg("PV1", &[(2, "I"), (3, "WEST^12^B^NH01"), (44, "20240101")]),
            seg("AL1", &[(1, "1"), (3, "^Penicillin")]),
            orc.to_string(),
            rxe("AB1234567"),
            seg("RXR", &[(1, "PO")]),
        ];
        lines.extend(rest.iter().cloned());
        Message::parse(&lines.join("\r")).expect("message parses")
    }

    fn find(records: &[Record], kind: RecordKind) -> Vec<&Record> {
        records.iter().filter(|r| r.kind() == kind).collect()
    }

    fn run(message: &Message, dialect: Dialect) -> EngineResult<Vec<Record>> {
        transformer(Arc::new(MemoryGuidStore::new())).transform(message, dialect)
    }

    #[test]
    fn new_order_produces_full_record_set() {
        let message = rde("EHR", &pid(), &orc("NW"), &[tq1("1", "Q2D", "")]);
        let records = run(&message, Dialect::AutoDiscover).expect("transforms");

        let kinds: Vec<RecordKind> = records.iter().map(Record::kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecordKind::Store,
                RecordKind::Facility,
                RecordKind::Patient,
                RecordKind::Prescriber,
                RecordKind::Drug,
                RecordKind::TimesQtys,
                RecordKind::Prescription,
            ]
        );

        let store = find(&records, RecordKind::Store)[0];
        assert_eq!(store.get("StoreID"), Some("STORE1"));
        assert_eq!(store.get("StoreName"), Some("Main Street Pharmacy"));

        let patient = find(&records, RecordKind::Patient)[0];
        assert_eq!(patient.get("PatientID"), Some("P123"));
        assert_eq!(patient.get("FacilityID"), Some("NH01"));
        assert_eq!(patient.get("LastName"), Some("DOE"));
        assert_eq!(patient.get("BirthDate"), Some("19400102"));
        assert_eq!(patient.get("City"), Some("Salem"));
        assert_eq!(patient.get("Room"), Some("12"));
        assert_eq!(patient.get("Allergies"), Some("Penicillin"));
        assert_eq!(patient.get("AdmitDate"), Some("20240101"));

        let drug = find(&records, RecordKind::Drug)[0];
        assert_eq!(drug.get("DrugName"), Some("Lisinopril 10mg"));
        assert_eq!(drug.get("DosageForm"), Some("TAB"));
        assert_eq!(drug.get("Strength"), Some("10"));

        let rx = find(&records, RecordKind::Prescription)[0];
        assert_eq!(rx.operation(), Operation::Add);
        assert_eq!(rx.get("RxNumber"), Some("RX1001"));
        assert_eq!(rx.get("DrugID"), Some("00093015001"));
        assert_eq!(rx.get("PrescriberID"), Some("DR9"));
        assert_eq!(rx.get("Sig"), Some("Take one daily"));
        assert_eq!(rx.get("Quantity"), Some("30"));
        assert_eq!(rx.get("Refills"), Some("2"));
        assert_eq!(rx.get("Route"), Some("PO"));
        assert_eq!(rx.get("StartDate"), Some("20240105"));
        assert_eq!(rx.get("DoseScheduleType"), Some("18"));
        assert_eq!(rx.get("StartOffset"), Some("2"));
        assert_eq!(rx.get("Status"), Some(STATUS_ACTIVE));

        let prescriber = find(&records, RecordKind::Prescriber)[0];
        assert_eq!(prescriber.get("LastName"), Some("SMITH"));
        assert_eq!(prescriber.get("DEA"), Some("AB1234567"));
        assert_eq!(prescriber.get("MiddleInitial"), Some("A"));
    }

    #[test]
    fn discontinue_relaxes_timing_and_sets_dates() {
        let message = rde("EHR", &pid(), &orc("DC"), &[]);
        let records = run(&message, Dialect::AutoDiscover).expect("transforms");

        let mut rx = find(&records, RecordKind::Prescription)[0].clone();
        assert_eq!(rx.operation(), Operation::Change);
        assert!(rx.dose_timing_relaxed());
        assert_eq!(rx.get("DiscontinueDate"), Some("20240110"));
        assert_eq!(rx.get("Status"), Some(STATUS_DISCONTINUED));
        assert!(find(&records, RecordKind::TimesQtys).is_empty());
        rx.to_payload().expect("relaxed dose timing validates");
    }

    #[test]
    fn replacement_duplicates_prescription() {
        let message = rde("EHR", &pid(), &orc("XO"), &[tq1("1", "BID", "0800~2000")]);
        let guids = Arc::new(MemoryGuidStore::new());
        let records = transformer(guids.clone())
            .transform(&message, Dialect::AutoDiscover)
            .expect("transforms");

        let prescriptions = find(&records, RecordKind::Prescription);
        assert_eq!(prescriptions.len(), 2);
        let (original, duplicate) = (prescriptions[0], prescriptions[1]);

        assert_eq!(original.operation(), Operation::Change);
        assert_eq!(original.get("Status"), Some(STATUS_DISCONTINUED));
        assert_eq!(duplicate.operation(), Operation::Add);
        assert_eq!(duplicate.get("RxNumber"), Some("ABCDEF012345"));
        assert_eq!(duplicate.get("OriginalRxNumber"), Some("RX1001"));
        assert_eq!(duplicate.get("StartDate"), Some(today().as_str()));
        assert_eq!(duplicate.get("Status"), Some(STATUS_ACTIVE));
        assert_eq!(duplicate.get("DoseTimesQtys"), Some("08001.0020001.00"));
        assert_eq!(guids.guid_for("ABCDEF012345").as_deref(), Some("guid-dup"));
    }

    #[test]
    fn generic_patient_id_falls_back_to_sentinel() {
        let pid = seg("PID", &[(1, "1"), (5, "DOE^JANE")]);
        let message = rde("EHR", &pid, &orc("NW"), &[tq1("1", "QD", "0900")]);
        let records = run(&message, Dialect::AutoDiscover).expect("transforms");
        let patient = find(&records, RecordKind::Patient)[0];
        assert_eq!(patient.get("PatientID"), Some(UNKNOWN_PATIENT_ID));
    }

    #[test]
    fn generic_patient_id_tries_alternate_locations() {
        let pid = seg("PID", &[(1, "1"), (4, "ALT9"), (5, "DOE^JANE")]);
        let message = rde("EHR", &pid, &orc("NW"), &[tq1("1", "QD", "0900")]);
        let records = run(&message, Dialect::AutoDiscover).expect("transforms");
        assert_eq!(find(&records, RecordKind::Patient)[0].get("PatientID"), Some("ALT9"));
    }

    #[test]
    fn point_click_care_embeds_facility_in_patient_id() {
        let pid = seg("PID", &[(1, "1"), (3, "P777^^^NH99"), (5, "DOE^JANE")]);
        let message = rde("PCC", &pid, &orc("NW"), &[tq1("1", "QD", "0900")]);
        let records = run(&message, Dialect::PointClickCare).expect("transforms");
        let patient = find(&records, RecordKind::Patient)[0];
        assert_eq!(patient.get("PatientID"), Some("P777"));
        assert_eq!(patient.get("FacilityID"), Some("NH99"));
    }

    #[test]
    fn framework_ltc_weekly_rotation() {
        let message = rde("FWLTC", &pid(), &orc("NW"), &[tq1("1", "QJ1", "0800")]);
        let records = run(&message, Dialect::FrameworkLtc).expect("transforms");
        let rx = find(&records, RecordKind::Prescription)[0];
        assert_eq!(rx.get("DaysOfWeek"), Some("XOOOOOO"));
        assert_eq!(rx.get("DoseScheduleType"), Some("5"));
    }

    #[test]
    fn invalid_dea_fails_the_message() {
        let lines = [
            msh("EHR", "RDE^O11"),
            pid(),
            orc("NW"),
            rxe("AB12"),
            tq1("1", "QD", "0900"),
        ];
        let message = Message::parse(&lines.join("\r")).expect("parses");
        let err = run(&message, Dialect::AutoDiscover).expect_err("short DEA");
        assert!(matches!(err, EngineError::FieldValidation(msg) if msg.contains("minimum length")));
    }

    #[test]
    fn zero_dose_fails_without_relaxation() {
        let message = rde("EHR", &pid(), &orc("NW"), &[tq1("0", "QD", "0900")]);
        let err = run(&message, Dialect::AutoDiscover).expect_err("zero dose");
        assert!(matches!(err, EngineError::FieldValidation(_)));
    }

    #[test]
    fn annotations_collect_notes_compounds_and_observations() {
        let rest = [
            tq1("1", "QD", "0900"),
            seg("RXC", &[(1, "B"), (2, "^Lactose"), (3, "10"), (4, "mg")]),
            seg("NTE", &[(1, "1"), (3, "Crush tablets")]),
            seg("OBX", &[(1, "1"), (2, "NM"), (3, "^Weight"), (5, "70"), (6, "kg")]),
        ];
        let message = rde("EHR", &pid(), &orc("NW"), &rest);
        let records = run(&message, Dialect::AutoDiscover).expect("transforms");
        let rx = find(&records, RecordKind::Prescription)[0];
        assert_eq!(
            rx.annotations(),
            &[
                "Crush tablets".to_string(),
                "Compound: Lactose 10mg".to_string(),
                "Weight: 70kg".to_string()
            ]
        );
    }

    #[test]
    fn admission_events_select_operation() {
        let text = |event: &str| {
            [
                msh("EHR", &format!("ADT^{event}")),
                pid(),
                seg("PV1", &[(2, "I"), (3, "WEST^12^B"), (44, "20240101"), (45, "20240201")]),
            ]
            .join("\r")
        };

        let add = Message::parse(&text("A01")).expect("parses");
        let records = run(&add, Dialect::AutoDiscover).expect("transforms");
        let patient = find(&records, RecordKind::Patient)[0];
        assert_eq!(patient.operation(), Operation::Add);
        assert_eq!(patient.get("FacilityID"), Some("NH01"));

        let discharge = Message::parse(&text("A03")).expect("parses");
        let records = run(&discharge, Dialect::AutoDiscover).expect("transforms");
        let patient = find(&records, RecordKind::Patient)[0];
        assert_eq!(patient.operation(), Operation::Change);
        assert_eq!(patient.get("DischargeDate"), Some("20240201"));
        assert_eq!(patient.get("Status"), Some(STATUS_DISCONTINUED));
    }

    #[test]
    fn translate_queues_records_in_dependency_order() {
        let message = rde("EHR", &pid(), &orc("NW"), &[tq1("1", "QD", "0900")]);
        let queue = transformer(Arc::new(MemoryGuidStore::new()))
            .translate(&message)
            .expect("translates");
        assert_eq!(queue.type_keys(), vec!['A', 'B', 'C', 'D', 'E', 'F', 'G']);
        assert!(queue.payloads().all(|p| p.starts_with("<Record><Table>")));
    }

    #[test]
    fn order_actions() {
        assert_eq!(OrderAction::from_control("nw"), OrderAction::New);
        assert_eq!(OrderAction::from_control("CA"), OrderAction::Replace);
        assert_eq!(OrderAction::from_control("ZZ"), OrderAction::Other);
        assert_eq!(OrderAction::Refill.operation(), Operation::Change);
    }
}
