use crate::dates::parse_iso_date;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Immutable data handed over by the enrollment workflow when a certificate
/// view is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInputs {
    pub student_name: String,
    pub course_name: String,
    pub course_modules: Vec<String>,
    pub workload: u32,
    pub start_date: String,
    pub end_date: String,
}

/// The editable projection of a certificate. Lives only as long as the view
/// that owns it and is never written back to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDraft {
    pub student_name: String,
    pub course_name: String,
    pub workload: String,
    pub start_date: String,
    pub end_date: String,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftField {
    StudentName,
    CourseName,
    Workload,
    StartDate,
    EndDate,
}

impl DraftField {
    pub const ALL: [DraftField; 5] = [
        DraftField::StudentName,
        DraftField::CourseName,
        DraftField::Workload,
        DraftField::StartDate,
        DraftField::EndDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DraftField::StudentName => "studentName",
            DraftField::CourseName => "courseName",
            DraftField::Workload => "workload",
            DraftField::StartDate => "startDate",
            DraftField::EndDate => "endDate",
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, DraftField::StartDate | DraftField::EndDate)
    }
}

impl FromStr for DraftField {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "studentName" | "student_name" => Ok(DraftField::StudentName),
            "courseName" | "course_name" => Ok(DraftField::CourseName),
            "workload" => Ok(DraftField::Workload),
            "startDate" | "start_date" => Ok(DraftField::StartDate),
            "endDate" | "end_date" => Ok(DraftField::EndDate),
            other => Err(format!("unknown certificate field: {other}")),
        }
    }
}

/// Advisory findings about a draft. None of them blocks editing or export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftWarning {
    WorkloadNotPositiveNumber(String),
    UnparsableDate { field: DraftField, value: String },
    EndBeforeStart { start: String, end: String },
    EmptyField(DraftField),
}

impl std::fmt::Display for DraftWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftWarning::WorkloadNotPositiveNumber(value) => {
                write!(f, "workload {value:?} is not a positive number")
            }
            DraftWarning::UnparsableDate { field, value } => {
                write!(f, "{} {value:?} is not a valid date", field.as_str())
            }
            DraftWarning::EndBeforeStart { start, end } => {
                write!(f, "end date {end} precedes start date {start}")
            }
            DraftWarning::EmptyField(field) => write!(f, "{} is empty", field.as_str()),
        }
    }
}

impl CertificateDraft {
    pub fn from_inputs(inputs: &CertificateInputs) -> Self {
        Self {
            student_name: inputs.student_name.clone(),
            course_name: inputs.course_name.clone(),
            workload: inputs.workload.to_string(),
            start_date: inputs.start_date.clone(),
            end_date: inputs.end_date.clone(),
            modules: inputs.course_modules.clone(),
        }
    }

    pub fn field(&self, field: DraftField) -> &str {
        match field {
            DraftField::StudentName => &self.student_name,
            DraftField::CourseName => &self.course_name,
            DraftField::Workload => &self.workload,
            DraftField::StartDate => &self.start_date,
            DraftField::EndDate => &self.end_date,
        }
    }

    pub fn set_field(&mut self, field: DraftField, value: impl Into<String>) {
        let value = value.into();
        match field {
            DraftField::StudentName => self.student_name = value,
            DraftField::CourseName => self.course_name = value,
            DraftField::Workload => self.workload = value,
            DraftField::StartDate => self.start_date = value,
            DraftField::EndDate => self.end_date = value,
        }
    }

    /// Appends `title` and returns its index.
    pub fn add_module(&mut self, title: impl Into<String>) -> usize {
        self.modules.push(title.into());
        self.modules.len() - 1
    }

    /// Replaces the title at `index`; out of range is ignored.
    pub fn set_module(&mut self, index: usize, title: impl Into<String>) -> bool {
        match self.modules.get_mut(index) {
            Some(slot) => {
                *slot = title.into();
                true
            }
            None => false,
        }
    }

    /// Removes the title at `index`; out of range is ignored.
    pub fn remove_module(&mut self, index: usize) -> Option<String> {
        if index < self.modules.len() {
            Some(self.modules.remove(index))
        } else {
            None
        }
    }

    /// Display labels `1.`..`N.` in list order.
    pub fn numbered_modules(&self) -> Vec<(String, &str)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, title)| (format!("{}.", i + 1), title.as_str()))
            .collect()
    }

    pub fn workload_hours(&self) -> Option<f64> {
        let value: f64 = self.workload.trim().replace(',', ".").parse().ok()?;
        (value.is_finite() && value > 0.0).then_some(value)
    }

    pub fn warnings(&self) -> Vec<DraftWarning> {
        let mut out = Vec::new();
        for field in [DraftField::StudentName, DraftField::CourseName] {
            if self.field(field).trim().is_empty() {
                out.push(DraftWarning::EmptyField(field));
            }
        }
        if self.workload_hours().is_none() {
            out.push(DraftWarning::WorkloadNotPositiveNumber(self.workload.clone()));
        }
        let start = parse_iso_date(&self.start_date);
        let end = parse_iso_date(&self.end_date);
        for (field, parsed) in [(DraftField::StartDate, start), (DraftField::EndDate, end)] {
            if parsed.is_none() {
                out.push(DraftWarning::UnparsableDate {
                    field,
                    value: self.field(field).to_string(),
                });
            }
        }
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                out.push(DraftWarning::EndBeforeStart {
                    start: self.start_date.clone(),
                    end: self.end_date.clone(),
                });
            }
        }
        out
    }
}
