//! `GradeBackend` over the school's GraphQL API, with the roster read from
//! the enrollment REST API.
//!
//! Both services speak Spanish field names (`calificaciones`, `nota`,
//! `observaciones`, `nombre_completo`); serde renames keep them out of the
//! domain types. The GraphQL schema has no nullable score, so an unscored
//! record travels as [`UNSET_SCORE`]. That translation happens here and
//! nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

use crate::backend::GradeBackend;
use crate::error::GradeError;
use crate::models::{
    GradeKey, GradeRecord, NewGradeRecord, RecordFilter, RecordUpdate, Score, Student, Subject,
    Teacher,
};
use crate::period::Period;

/// Wire value standing in for "no score yet".
pub const UNSET_SCORE: f64 = 0.0;

/// Upper bound on followed roster pages, in case `next` links loop.
const MAX_ROSTER_PAGES: usize = 200;

const RECORD_FIELDS: &str = "id estudianteId asignaturaId cursoId periodo nota observaciones";

const RECORDS_QUERY: &str = r#"
query($estudianteId: ID, $asignaturaId: ID, $cursoId: ID, $periodo: String) {
  calificaciones(estudianteId: $estudianteId, asignaturaId: $asignaturaId, cursoId: $cursoId, periodo: $periodo) {
    RECORD_FIELDS
  }
}"#;

const CREATE_MUTATION: &str = r#"
mutation($input: CalificacionInput!) {
  registrarCalificacion(input: $input) {
    success
    message
    errors
    calificacion { RECORD_FIELDS }
  }
}"#;

const UPDATE_MUTATION: &str = r#"
mutation($id: ID!, $nota: Float, $observaciones: String) {
  actualizarCalificacion(id: $id, nota: $nota, observaciones: $observaciones) {
    success
    message
    errors
    calificacion { RECORD_FIELDS }
  }
}"#;

const DELETE_MUTATION: &str = r#"
mutation($id: ID!) {
  eliminarCalificacion(id: $id) {
    success
    message
    errors
  }
}"#;

const SUBJECTS_QUERY: &str = "query { asignaturas { id nombre profesorIds } }";

const TEACHERS_QUERY: &str = "query { profesores { id nombre } }";

pub struct GraphqlBackend {
    client: reqwest::Client,
    endpoint: String,
    roster_url: String,
}

impl GraphqlBackend {
    pub fn new(endpoint: &str, roster_url: &str, timeout: Duration) -> Result<Self, GradeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint, roster_url))
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str, roster_url: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            roster_url: roster_url.trim_end_matches('/').to_string(),
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, GradeError> {
        let query = query.replace("RECORD_FIELDS", RECORD_FIELDS);
        tracing::debug!(operation, endpoint = %self.endpoint, "GraphQL request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body: GraphqlResponse<T> = response
            .json()
            .await
            .map_err(|err| GradeError::Decode(format!("{operation}: {err}")))?;
        if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
            return Err(GradeError::Domain {
                operation,
                errors: errors.into_iter().map(|e| e.message).collect(),
            });
        }
        body.data
            .ok_or_else(|| GradeError::Decode(format!("{operation}: response has no data")))
    }

    async fn fetch_roster_page(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<RosterPage, GradeError> {
        let response = ensure_success(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|err| GradeError::Decode(format!("roster: {err}")))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GradeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(GradeError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlErrorMessage>>,
}

#[derive(Deserialize)]
struct GraphqlErrorMessage {
    message: String,
}

/// The `{success, message, errors, calificacion}` envelope every mutation returns.
#[derive(Deserialize)]
struct MutationEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<Vec<String>>,
    #[serde(default, rename = "calificacion")]
    record: Option<WireRecord>,
}

impl MutationEnvelope {
    fn check(self, operation: &'static str) -> Result<Option<WireRecord>, GradeError> {
        if self.success {
            return Ok(self.record);
        }
        let mut errors = self.errors.unwrap_or_default();
        if errors.is_empty() {
            errors.push(
                self.message
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            );
        }
        Err(GradeError::Domain { operation, errors })
    }

    fn into_record(self, operation: &'static str) -> Result<GradeRecord, GradeError> {
        self.check(operation)?
            .ok_or_else(|| GradeError::Decode(format!("{operation}: success without record")))?
            .into_domain()
    }
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(rename = "estudianteId", deserialize_with = "flexible_id")]
    student_id: String,
    #[serde(rename = "asignaturaId", deserialize_with = "flexible_id")]
    subject_id: String,
    #[serde(rename = "cursoId", deserialize_with = "flexible_id")]
    course_id: String,
    #[serde(rename = "periodo")]
    period: String,
    #[serde(rename = "nota")]
    score: Option<f64>,
    #[serde(default, rename = "observaciones")]
    note: Option<String>,
}

impl WireRecord {
    fn into_domain(self) -> Result<GradeRecord, GradeError> {
        let period = Period::parse(&self.period)
            .map_err(|err| GradeError::Decode(format!("record {}: {err}", self.id)))?;
        Ok(GradeRecord {
            id: self.id,
            key: GradeKey {
                student_id: self.student_id,
                subject_id: self.subject_id,
                course_id: self.course_id,
                period,
            },
            score: decode_score(self.score),
            note: self.note.unwrap_or_default(),
        })
    }
}

/// `CalificacionInput`.
#[derive(Serialize)]
struct WireRecordInput<'a> {
    #[serde(rename = "estudianteId")]
    student_id: &'a str,
    #[serde(rename = "asignaturaId")]
    subject_id: &'a str,
    #[serde(rename = "cursoId")]
    course_id: &'a str,
    #[serde(rename = "periodo")]
    period: &'a str,
    #[serde(rename = "nota")]
    score: f64,
    #[serde(rename = "observaciones")]
    note: &'a str,
}

#[derive(Deserialize)]
struct RecordsData {
    calificaciones: Vec<WireRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    registrar_calificacion: MutationEnvelope,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateData {
    actualizar_calificacion: MutationEnvelope,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteData {
    eliminar_calificacion: MutationEnvelope,
}

#[derive(Deserialize)]
struct WireSubject {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(rename = "nombre")]
    name: String,
    #[serde(default, rename = "profesorIds")]
    teacher_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SubjectsData {
    asignaturas: Vec<WireSubject>,
}

#[derive(Deserialize)]
struct WireTeacher {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(rename = "nombre")]
    name: String,
}

#[derive(Deserialize)]
struct TeachersData {
    profesores: Vec<WireTeacher>,
}

#[derive(Deserialize)]
struct WireStudent {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(rename = "nombre_completo", alias = "full_name")]
    full_name: String,
    #[serde(default, rename = "documento", alias = "document")]
    document: Option<String>,
}

/// The enrollment API answers with a bare list or a paginated page.
#[derive(Deserialize)]
#[serde(untagged)]
enum RosterPage {
    Paged {
        results: Vec<WireStudent>,
        next: Option<String>,
    },
    Plain(Vec<WireStudent>),
}

/// Ids arrive as strings from GraphQL and as integers from REST.
fn flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

pub fn encode_score(score: Option<Score>) -> f64 {
    score.map(Score::value).unwrap_or(UNSET_SCORE)
}

/// A missing score and the wire sentinel both read back as unscored.
pub fn decode_score(raw: Option<f64>) -> Option<Score> {
    raw.filter(|value| *value != UNSET_SCORE)
        .map(Score::new_unchecked)
}

#[async_trait]
impl GradeBackend for GraphqlBackend {
    async fn list_grade_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<GradeRecord>, GradeError> {
        let variables = json!({
            "estudianteId": filter.student_id,
            "asignaturaId": filter.subject_id,
            "cursoId": filter.course_id,
            "periodo": filter.period.as_ref().map(Period::as_str),
        });
        let data: RecordsData = self
            .execute("calificaciones", RECORDS_QUERY, variables)
            .await?;
        data.calificaciones
            .into_iter()
            .map(WireRecord::into_domain)
            .collect()
    }

    async fn create_grade_record(
        &self,
        record: &NewGradeRecord,
    ) -> Result<GradeRecord, GradeError> {
        let input = WireRecordInput {
            student_id: &record.key.student_id,
            subject_id: &record.key.subject_id,
            course_id: &record.key.course_id,
            period: record.key.period.as_str(),
            score: encode_score(record.score),
            note: &record.note,
        };
        let data: CreateData = self
            .execute("registrarCalificacion", CREATE_MUTATION, json!({ "input": input }))
            .await?;
        data.registrar_calificacion.into_record("registrarCalificacion")
    }

    async fn update_grade_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<GradeRecord, GradeError> {
        let variables = json!({
            "id": id,
            "nota": update.score.map(Score::value),
            "observaciones": update.note,
        });
        let data: UpdateData = self
            .execute("actualizarCalificacion", UPDATE_MUTATION, variables)
            .await?;
        data.actualizar_calificacion.into_record("actualizarCalificacion")
    }

    async fn delete_grade_record(&self, id: &str) -> Result<(), GradeError> {
        let data: DeleteData = self
            .execute("eliminarCalificacion", DELETE_MUTATION, json!({ "id": id }))
            .await?;
        data.eliminar_calificacion.check("eliminarCalificacion")?;
        Ok(())
    }

    async fn list_roster(&self, course_id: &str) -> Result<Vec<Student>, GradeError> {
        let mut request = self
            .client
            .get(format!("{}/estudiantes/", self.roster_url))
            .query(&[("curso", course_id)]);
        let mut students = Vec::new();

        for _ in 0..MAX_ROSTER_PAGES {
            let (page, next) = match self.fetch_roster_page(request).await? {
                RosterPage::Plain(results) => (results, None),
                RosterPage::Paged { results, next } => (results, next),
            };
            students.extend(page.into_iter().map(|student| Student {
                id: student.id,
                full_name: student.full_name,
                document: student.document.unwrap_or_default(),
            }));
            match next {
                // `next` links come back fully encoded.
                Some(next) => request = self.client.get(next),
                None => return Ok(students),
            }
        }

        Err(GradeError::Decode(format!(
            "roster for course {course_id} exceeded {MAX_ROSTER_PAGES} pages"
        )))
    }

    async fn list_subject_catalog(&self) -> Result<Vec<Subject>, GradeError> {
        let data: SubjectsData = self.execute("asignaturas", SUBJECTS_QUERY, json!({})).await?;
        Ok(data
            .asignaturas
            .into_iter()
            .map(|subject| Subject {
                id: subject.id,
                name: subject.name,
                teacher_ids: subject.teacher_ids,
            })
            .collect())
    }

    async fn list_teachers(&self) -> Result<Vec<Teacher>, GradeError> {
        let data: TeachersData = self.execute("profesores", TEACHERS_QUERY, json!({})).await?;
        Ok(data
            .profesores
            .into_iter()
            .map(|teacher| Teacher {
                id: teacher.id,
                name: teacher.name,
            })
            .collect())
    }

    /// The service stores "unset" as the sentinel, so a stored sentinel
    /// already holds a submitted score equal to it.
    fn holds_score(&self, stored: Option<Score>, wanted: Score) -> bool {
        encode_score(stored) == wanted.value()
    }
}
