//! Field tables for each record kind, in wire order.

use crate::field::{FieldSpec, RequiredClass};

const K: RequiredClass = RequiredClass::Key;
const A: RequiredClass = RequiredClass::Add;
const C: RequiredClass = RequiredClass::Change;
const W: RequiredClass = RequiredClass::WouldLike;

const fn f(tag: &'static str, max_len: usize, class: RequiredClass) -> FieldSpec {
    FieldSpec::new(tag, max_len, class)
}

pub(crate) static STORE: &[FieldSpec] = &[
    f("StoreID", 10, K),
    f("StoreName", 40, A),
    f("Address1", 40, W),
    f("Address2", 40, W),
    f("City", 30, W),
    f("State", 2, W),
    f("Zip", 10, W),
    f("Phone", 15, W),
    f("Fax", 15, W),
    f("DEA", 9, W),
    f("NPI", 10, W),
];

pub(crate) static FACILITY: &[FieldSpec] = &[
    f("FacilityID", 10, K),
    f("FacilityName", 40, A),
    f("StoreID", 10, A),
    f("Address1", 40, W),
    f("Address2", 40, W),
    f("City", 30, W),
    f("State", 2, W),
    f("Zip", 10, W),
    f("Phone", 15, W),
    f("Fax", 15, W),
    f("Comments", 255, W),
];

pub(crate) static PRESCRIBER: &[FieldSpec] = &[
    f("PrescriberID", 10, K),
    f("LastName", 30, A),
    f("FirstName", 20, A),
    f("MiddleInitial", 1, W),
    f("DEA", 9, W),
    f("NPI", 10, W),
    f("StateLicense", 20, W),
    f("Address1", 40, W),
    f("City", 30, W),
    f("State", 2, W),
    f("Zip", 10, W),
    f("Phone", 15, W),
    f("Fax", 15, W),
    f("Specialty", 30, W),
];

pub(crate) static PATIENT: &[FieldSpec] = &[
    f("FacilityID", 10, K),
    f("PatientID", 20, K),
    f("LastName", 30, A),
    f("FirstName", 20, A),
    f("MiddleName", 20, W),
    f("BirthDate", 8, A),
    f("Sex", 1, W),
    f("SSN", 9, W),
    f("Room", 10, W),
    f("Bed", 5, W),
    f("Wing", 10, W),
    f("AdmitDate", 8, W),
    f("DischargeDate", 8, W),
    f("Address1", 40, W),
    f("Address2", 40, W),
    f("City", 30, W),
    f("State", 2, W),
    f("Zip", 10, W),
    f("Phone", 15, W),
    f("Allergies", 255, W),
    f("Diagnoses", 255, W),
    f("InsuranceCarrier", 40, W),
    f("PolicyNumber", 20, W),
    f("GroupNumber", 20, W),
    f("Status", 1, W),
    f("Comments", 255, W),
];

pub(crate) static DRUG: &[FieldSpec] = &[
    f("DrugID", 11, K),
    f("DrugName", 40, A),
    f("Strength", 15, W),
    f("StrengthUnit", 10, W),
    f("DosageForm", 10, W),
    f("GenericName", 40, W),
    f("Manufacturer", 30, W),
    f("Route", 10, W),
];

pub(crate) static TIMES_QTYS: &[FieldSpec] = &[
    f("TQCode", 10, K),
    f("Description", 60, A),
    f("DoseScheduleType", 2, A),
    f("DoseTimesQtys", 280, A),
    f("DaysOfWeek", 7, W),
    f("StartOffset", 3, W),
];

pub(crate) static PRESCRIPTION: &[FieldSpec] = &[
    f("RxNumber", 12, K),
    f("FacilityID", 10, K),
    f("PatientID", 20, K),
    f("PrescriberID", 10, A),
    f("DrugID", 11, A),
    f("Sig", 255, A).universal(),
    f("Quantity", 10, A),
    f("DaysSupply", 4, W),
    f("Refills", 3, W),
    f("StartDate", 8, A),
    f("StopDate", 8, W),
    f("DiscontinueDate", 8, W),
    f("TQCode", 10, W),
    f("DoseScheduleType", 2, W),
    f("DoseTimesQtys", 280, A),
    f("DaysOfWeek", 7, W),
    f("StartOffset", 3, W),
    f("PRN", 1, W),
    f("Route", 10, W),
    f("Status", 1, C),
    f("OriginalRxNumber", 12, W),
    f("Comments", 255, W),
];
