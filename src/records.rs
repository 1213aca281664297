use crate::dates::parse_iso_date;
use crate::draft::CertificateInputs;
use crate::error::{CertificateError, Result};
use crate::export::ExportReport;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub modules: Vec<String>,
    pub workload_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    #[serde(rename = "videoconferencia")]
    Videoconference,
    #[serde(rename = "ead")]
    Ead,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Videoconference => "videoconferencia",
            Modality::Ead => "ead",
        }
    }
}

/// A scheduled run of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCycle {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub modality: Modality,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttendance {
    pub date: NaiveDate,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoconferenceEnrollment {
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub attendance: Vec<SessionAttendance>,
}

impl VideoconferenceEnrollment {
    /// Share of recorded sessions attended, 0..=100. `None` before the first
    /// session is recorded.
    pub fn attendance_percentage(&self) -> Option<f64> {
        if self.attendance.is_empty() {
            return None;
        }
        let present = self.attendance.iter().filter(|s| s.present).count();
        Some(present as f64 / self.attendance.len() as f64 * 100.0)
    }
}

/// Up to three platform access dates of a distance-learning student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EadAccess {
    pub access_dates: [Option<NaiveDate>; 3],
    pub updated_at: Option<DateTime<Utc>>,
}

impl EadAccess {
    /// Builds access dates from form values; empty strings mean "no access".
    pub fn from_form(values: [&str; 3]) -> Result<Self> {
        let mut access_dates = [None; 3];
        for (slot, raw) in access_dates.iter_mut().zip(values) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            *slot = Some(parse_iso_date(raw).ok_or_else(|| {
                CertificateError::InvalidRecord(format!("invalid access date {raw:?}"))
            })?);
        }
        Ok(Self {
            access_dates,
            updated_at: None,
        })
    }

    pub fn access_count(&self) -> usize {
        self.access_dates.iter().filter(|d| d.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EadEnrollment {
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub access: EadAccess,
}

/// A student's place in a class, shaped by the class modality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum Enrollment {
    #[serde(rename = "videoconferencia")]
    Videoconference(VideoconferenceEnrollment),
    Ead(EadEnrollment),
}

impl Enrollment {
    pub fn class_id(&self) -> Uuid {
        match self {
            Enrollment::Videoconference(e) => e.class_id,
            Enrollment::Ead(e) => e.class_id,
        }
    }

    pub fn student_id(&self) -> Uuid {
        match self {
            Enrollment::Videoconference(e) => e.student_id,
            Enrollment::Ead(e) => e.student_id,
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            Enrollment::Videoconference(_) => Modality::Videoconference,
            Enrollment::Ead(_) => Modality::Ead,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateIssuance {
    pub id: Uuid,
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub file_name: String,
    pub sha256: String,
    pub issued_at: DateTime<Utc>,
}

impl CertificateIssuance {
    /// Issuance row for a certificate that was just exported.
    pub fn from_report(class_id: Uuid, student_id: Uuid, report: &ExportReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_id,
            student_id,
            file_name: report.file_name.clone(),
            sha256: report.sha256.clone(),
            issued_at: Utc::now(),
        }
    }
}

/// Row-level access to the academic tables.
pub trait RecordStore: Send + Sync {
    fn course(&self, id: Uuid) -> Result<Course>;
    fn class_cycle(&self, id: Uuid) -> Result<ClassCycle>;
    fn student(&self, id: Uuid) -> Result<Student>;
    /// Enrollments of a class in enrollment order.
    fn enrollments(&self, class_id: Uuid) -> Result<Vec<Enrollment>>;
    fn enroll(&self, class_id: Uuid, student_id: Uuid) -> Result<Enrollment>;
    /// Records presence for one session date, replacing an earlier entry for
    /// the same date.
    fn record_attendance(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        attendance: SessionAttendance,
    ) -> Result<()>;
    /// Insert-or-update keyed on `(class_id, student_id)`; stamps `updated_at`.
    fn upsert_ead_access(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        access: EadAccess,
    ) -> Result<EadAccess>;
    fn record_certificate_issuance(&self, issuance: CertificateIssuance) -> Result<()>;
    fn issuances(&self, class_id: Uuid) -> Result<Vec<CertificateIssuance>>;
}

/// Saves every edited EAD access row of a class. Students without an edit are
/// left alone. Returns how many rows were written.
pub fn save_all_ead_access(
    store: &dyn RecordStore,
    class_id: Uuid,
    edits: &HashMap<Uuid, EadAccess>,
) -> Result<usize> {
    let mut saved = 0;
    for enrollment in store.enrollments(class_id)? {
        let student_id = enrollment.student_id();
        if let Some(access) = edits.get(&student_id) {
            store.upsert_ead_access(class_id, student_id, access.clone())?;
            saved += 1;
        }
    }
    tracing::info!(%class_id, saved, "saved EAD access rows");
    Ok(saved)
}

/// Certificate data for one enrolled student: course name, modules and
/// workload from the course, period from the class.
pub fn certificate_inputs_for(
    store: &dyn RecordStore,
    class_id: Uuid,
    student_id: Uuid,
) -> Result<CertificateInputs> {
    let class = store.class_cycle(class_id)?;
    let enrolled = store
        .enrollments(class_id)?
        .iter()
        .any(|e| e.student_id() == student_id);
    if !enrolled {
        return Err(CertificateError::NotFound {
            kind: "enrollment",
            id: format!("{class_id}/{student_id}"),
        });
    }
    let course = store.course(class.course_id)?;
    let student = store.student(student_id)?;
    Ok(CertificateInputs {
        student_name: student.full_name,
        course_name: course.name,
        course_modules: course.modules,
        workload: course.workload_hours,
        start_date: class.start_date.format("%Y-%m-%d").to_string(),
        end_date: class.end_date.format("%Y-%m-%d").to_string(),
    })
}

#[derive(Debug, Default)]
struct Tables {
    courses: HashMap<Uuid, Course>,
    classes: HashMap<Uuid, ClassCycle>,
    students: HashMap<Uuid, Student>,
    enrollments: Vec<Enrollment>,
    issuances: Vec<CertificateIssuance>,
}

impl Tables {
    fn enrollment_mut(&mut self, class_id: Uuid, student_id: Uuid) -> Result<&mut Enrollment> {
        self.enrollments
            .iter_mut()
            .find(|e| e.class_id() == class_id && e.student_id() == student_id)
            .ok_or_else(|| CertificateError::NotFound {
                kind: "enrollment",
                id: format!("{class_id}/{student_id}"),
            })
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: Mutex<Tables>,
}

fn not_found(kind: &'static str, id: Uuid) -> CertificateError {
    CertificateError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| CertificateError::Store("record store lock poisoned".to_string()))
    }

    pub fn insert_course(&self, course: Course) -> Result<Uuid> {
        let id = course.id;
        self.tables()?.courses.insert(id, course);
        Ok(id)
    }

    pub fn insert_class(&self, class: ClassCycle) -> Result<Uuid> {
        let mut tables = self.tables()?;
        if !tables.courses.contains_key(&class.course_id) {
            return Err(not_found("course", class.course_id));
        }
        let id = class.id;
        tables.classes.insert(id, class);
        Ok(id)
    }

    pub fn insert_student(&self, student: Student) -> Result<Uuid> {
        let id = student.id;
        self.tables()?.students.insert(id, student);
        Ok(id)
    }
}

impl RecordStore for MemoryRecordStore {
    fn course(&self, id: Uuid) -> Result<Course> {
        self.tables()?
            .courses
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("course", id))
    }

    fn class_cycle(&self, id: Uuid) -> Result<ClassCycle> {
        self.tables()?
            .classes
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("class", id))
    }

    fn student(&self, id: Uuid) -> Result<Student> {
        self.tables()?
            .students
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("student", id))
    }

    fn enrollments(&self, class_id: Uuid) -> Result<Vec<Enrollment>> {
        let tables = self.tables()?;
        if !tables.classes.contains_key(&class_id) {
            return Err(not_found("class", class_id));
        }
        Ok(tables
            .enrollments
            .iter()
            .filter(|e| e.class_id() == class_id)
            .cloned()
            .collect())
    }

    fn enroll(&self, class_id: Uuid, student_id: Uuid) -> Result<Enrollment> {
        let mut tables = self.tables()?;
        let modality = tables
            .classes
            .get(&class_id)
            .map(|c| c.modality)
            .ok_or_else(|| not_found("class", class_id))?;
        if !tables.students.contains_key(&student_id) {
            return Err(not_found("student", student_id));
        }
        if let Ok(existing) = tables.enrollment_mut(class_id, student_id) {
            return Ok(existing.clone());
        }
        let enrollment = match modality {
            Modality::Videoconference => Enrollment::Videoconference(VideoconferenceEnrollment {
                class_id,
                student_id,
                attendance: Vec::new(),
            }),
            Modality::Ead => Enrollment::Ead(EadEnrollment {
                class_id,
                student_id,
                access: EadAccess::default(),
            }),
        };
        tables.enrollments.push(enrollment.clone());
        tracing::debug!(%class_id, %student_id, modality = modality.as_str(), "student enrolled");
        Ok(enrollment)
    }

    fn record_attendance(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        attendance: SessionAttendance,
    ) -> Result<()> {
        let mut tables = self.tables()?;
        match tables.enrollment_mut(class_id, student_id)? {
            Enrollment::Videoconference(enrollment) => {
                match enrollment
                    .attendance
                    .iter_mut()
                    .find(|s| s.date == attendance.date)
                {
                    Some(existing) => *existing = attendance,
                    None => enrollment.attendance.push(attendance),
                }
                Ok(())
            }
            Enrollment::Ead(_) => Err(CertificateError::ModalityMismatch {
                class_id: class_id.to_string(),
                expected: Modality::Ead.as_str(),
                actual: Modality::Videoconference.as_str(),
            }),
        }
    }

    fn upsert_ead_access(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        mut access: EadAccess,
    ) -> Result<EadAccess> {
        let mut tables = self.tables()?;
        match tables.enrollment_mut(class_id, student_id)? {
            Enrollment::Ead(enrollment) => {
                access.updated_at = Some(Utc::now());
                enrollment.access = access.clone();
                tracing::debug!(
                    %class_id,
                    %student_id,
                    accesses = access.access_count(),
                    "EAD access upserted"
                );
                Ok(access)
            }
            Enrollment::Videoconference(_) => Err(CertificateError::ModalityMismatch {
                class_id: class_id.to_string(),
                expected: Modality::Videoconference.as_str(),
                actual: Modality::Ead.as_str(),
            }),
        }
    }

    fn record_certificate_issuance(&self, issuance: CertificateIssuance) -> Result<()> {
        let mut tables = self.tables()?;
        if !tables.classes.contains_key(&issuance.class_id) {
            return Err(not_found("class", issuance.class_id));
        }
        tracing::info!(
            class_id = %issuance.class_id,
            student_id = %issuance.student_id,
            file_name = %issuance.file_name,
            "certificate issuance recorded"
        );
        tables.issuances.push(issuance);
        Ok(())
    }

    fn issuances(&self, class_id: Uuid) -> Result<Vec<CertificateIssuance>> {
        Ok(self
            .tables()?
            .issuances
            .iter()
            .filter(|i| i.class_id == class_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        parse_iso_date(raw).unwrap()
    }

    struct Fixture {
        store: MemoryRecordStore,
        video_class: Uuid,
        ead_class: Uuid,
        ana: Uuid,
        bruno: Uuid,
    }

    fn fixture() -> Fixture {
        let store = MemoryRecordStore::new();
        let course = store
            .insert_course(Course {
                id: Uuid::new_v4(),
                name: "Educação Inclusiva".to_string(),
                modules: vec!["Marcos Legais".to_string(), "Práticas".to_string()],
                workload_hours: 120,
            })
            .unwrap();
        let class = |modality| ClassCycle {
            id: Uuid::new_v4(),
            course_id: course,
            name: "Turma 2025.1".to_string(),
            modality,
            start_date: date("2025-02-10"),
            end_date: date("2025-05-30"),
        };
        let video_class = store.insert_class(class(Modality::Videoconference)).unwrap();
        let ead_class = store.insert_class(class(Modality::Ead)).unwrap();
        let student = |name: &str| Student {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: format!("{}@exemplo.org", name.to_lowercase().replace(' ', ".")),
        };
        let ana = store.insert_student(student("Ana Paula Rocha")).unwrap();
        let bruno = store.insert_student(student("Bruno Lima")).unwrap();
        for class_id in [video_class, ead_class] {
            store.enroll(class_id, ana).unwrap();
            store.enroll(class_id, bruno).unwrap();
        }
        Fixture {
            store,
            video_class,
            ead_class,
            ana,
            bruno,
        }
    }

    #[test]
    fn enrollment_shape_follows_class_modality() {
        let f = fixture();
        let video = f.store.enrollments(f.video_class).unwrap();
        let ead = f.store.enrollments(f.ead_class).unwrap();
        assert!(video.iter().all(|e| e.modality() == Modality::Videoconference));
        assert!(ead.iter().all(|e| e.modality() == Modality::Ead));
        assert_eq!(video.len(), 2);
        let again = f.store.enroll(f.video_class, f.ana).unwrap();
        assert_eq!(again.student_id(), f.ana);
        assert_eq!(f.store.enrollments(f.video_class).unwrap().len(), 2);
    }

    #[test]
    fn attendance_percentage_counts_present_sessions() {
        let f = fixture();
        let sessions = [
            ("2025-02-10", true),
            ("2025-02-17", false),
            ("2025-02-24", true),
            ("2025-03-03", true),
        ];
        for (day, present) in sessions {
            f.store
                .record_attendance(
                    f.video_class,
                    f.ana,
                    SessionAttendance {
                        date: date(day),
                        present,
                    },
                )
                .unwrap();
        }
        // Correcting a session replaces it instead of adding another.
        f.store
            .record_attendance(
                f.video_class,
                f.ana,
                SessionAttendance {
                    date: date("2025-02-17"),
                    present: true,
                },
            )
            .unwrap();
        let enrollments = f.store.enrollments(f.video_class).unwrap();
        let percentages: Vec<Option<f64>> = enrollments
            .iter()
            .map(|e| match e {
                Enrollment::Videoconference(v) => v.attendance_percentage(),
                Enrollment::Ead(_) => unreachable!(),
            })
            .collect();
        assert_eq!(percentages, vec![Some(100.0), None]);
    }

    #[test]
    fn modality_mismatches_are_rejected() {
        let f = fixture();
        let err = f
            .store
            .record_attendance(
                f.ead_class,
                f.ana,
                SessionAttendance {
                    date: date("2025-02-10"),
                    present: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CertificateError::ModalityMismatch { .. }));
        let err = f
            .store
            .upsert_ead_access(f.video_class, f.ana, EadAccess::default())
            .unwrap_err();
        assert!(matches!(err, CertificateError::ModalityMismatch { .. }));
    }

    #[test]
    fn ead_form_values_treat_empty_as_absent() {
        let access = EadAccess::from_form(["2025-03-01", "", " 2025-03-15 "]).unwrap();
        assert_eq!(access.access_count(), 2);
        assert_eq!(access.access_dates[1], None);
        assert!(EadAccess::from_form(["01/03/2025", "", ""]).is_err());
    }

    #[test]
    fn upsert_replaces_row_and_stamps_time() {
        let f = fixture();
        let first = EadAccess::from_form(["2025-03-01", "", ""]).unwrap();
        let saved = f.store.upsert_ead_access(f.ead_class, f.ana, first).unwrap();
        assert!(saved.updated_at.is_some());
        let second = EadAccess::from_form(["2025-03-01", "2025-03-08", ""]).unwrap();
        f.store.upsert_ead_access(f.ead_class, f.ana, second).unwrap();
        let rows: Vec<EadEnrollment> = f
            .store
            .enrollments(f.ead_class)
            .unwrap()
            .into_iter()
            .filter_map(|e| match e {
                Enrollment::Ead(e) => Some(e),
                Enrollment::Videoconference(_) => None,
            })
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].access.access_count(), 2);
    }

    #[test]
    fn save_all_only_writes_edited_students() {
        let f = fixture();
        let mut edits = HashMap::new();
        edits.insert(f.bruno, EadAccess::from_form(["2025-04-01", "", ""]).unwrap());
        edits.insert(Uuid::new_v4(), EadAccess::default());
        let saved = save_all_ead_access(&f.store, f.ead_class, &edits).unwrap();
        assert_eq!(saved, 1);
        let rows = f.store.enrollments(f.ead_class).unwrap();
        let stamped: Vec<bool> = rows
            .iter()
            .map(|e| match e {
                Enrollment::Ead(e) => e.access.updated_at.is_some(),
                Enrollment::Videoconference(_) => false,
            })
            .collect();
        assert_eq!(stamped, vec![false, true]);
    }

    #[test]
    fn certificate_inputs_come_from_course_class_and_student() {
        let f = fixture();
        let inputs = certificate_inputs_for(&f.store, f.video_class, f.ana).unwrap();
        assert_eq!(inputs.student_name, "Ana Paula Rocha");
        assert_eq!(inputs.course_name, "Educação Inclusiva");
        assert_eq!(inputs.course_modules, vec!["Marcos Legais", "Práticas"]);
        assert_eq!(inputs.workload, 120);
        assert_eq!(inputs.start_date, "2025-02-10");
        assert_eq!(inputs.end_date, "2025-05-30");

        let stranger = f
            .store
            .insert_student(Student {
                id: Uuid::new_v4(),
                full_name: "Carla".to_string(),
                email: "carla@exemplo.org".to_string(),
            })
            .unwrap();
        let err = certificate_inputs_for(&f.store, f.video_class, stranger).unwrap_err();
        assert!(matches!(err, CertificateError::NotFound { kind: "enrollment", .. }));
    }

    #[test]
    fn issuances_are_listed_per_class() {
        let f = fixture();
        f.store
            .record_certificate_issuance(CertificateIssuance::from_report(
                f.video_class,
                f.ana,
                &ExportReport {
                    file_name: "Certificado_Ana_Paula_Rocha.pdf".to_string(),
                    location: "memory".to_string(),
                    page_count: 2,
                    page_size_pt: (841.89, 595.28),
                    byte_len: 1024,
                    sha256: "0".repeat(64),
                    metrics: Default::default(),
                    warnings: Vec::new(),
                },
            ))
            .unwrap();
        let issued = f.store.issuances(f.video_class).unwrap();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].file_name, "Certificado_Ana_Paula_Rocha.pdf");
        assert!(f.store.issuances(f.ead_class).unwrap().is_empty());
    }

    #[test]
    fn enrollment_serializes_with_modality_tag() {
        let enrollment = Enrollment::Ead(EadEnrollment {
            class_id: Uuid::nil(),
            student_id: Uuid::nil(),
            access: EadAccess::default(),
        });
        let json = serde_json::to_value(&enrollment).unwrap();
        assert_eq!(json["modality"], "ead");
        let back: Enrollment = serde_json::from_value(json).unwrap();
        assert_eq!(back, enrollment);
    }
}
