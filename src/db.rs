use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::backend::GradeBackend;
use crate::error::GradeError;
use crate::models::{
    GradeKey, GradeRecord, NewGradeRecord, RecordFilter, RecordUpdate, Score, Student, Subject,
    Teacher,
};
use crate::period::Period;

const RECORD_COLUMNS: &str = "id, student_id, subject_id, course_id, period, score, note";

pub async fn init_db(pool: &PgPool) -> Result<(), GradeError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> Result<(), GradeError> {
    let teachers = vec![
        ("T1", "Juan Lopez"),
        ("T2", "Ana Smith"),
        ("T3", "Carlos Torres"),
    ];
    for (id, name) in teachers {
        sqlx::query(
            r#"
            INSERT INTO gradebook.teachers (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let subjects = vec![
        ("MATH", "Mathematics", vec!["T1"]),
        ("ENG", "English", vec!["T2"]),
        ("SCI", "Science", vec!["T3", "T1"]),
    ];
    for (id, name, teacher_ids) in subjects {
        sqlx::query(
            r#"
            INSERT INTO gradebook.subjects (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

        for teacher_id in teacher_ids {
            sqlx::query(
                r#"
                INSERT INTO gradebook.subject_teachers (subject_id, teacher_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(teacher_id)
            .execute(pool)
            .await?;
        }
    }

    let students = vec![
        ("S1", "Maria Perez", "1001", "1A"),
        ("S2", "Juan Gomez", "1002", "1A"),
        ("S3", "Laura Sanchez", "1003", "2B"),
        ("S4", "Carlos Ruiz", "1004", "2B"),
    ];
    for (id, full_name, document, course_id) in students {
        upsert_student(pool, id, full_name, document, course_id).await?;
    }

    Ok(())
}

async fn upsert_student(
    pool: &PgPool,
    id: &str,
    full_name: &str,
    document: &str,
    course_id: &str,
) -> Result<(), GradeError> {
    sqlx::query(
        r#"
        INSERT INTO gradebook.students (id, full_name, document, course_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            document = EXCLUDED.document,
            course_id = EXCLUDED.course_id
        "#,
    )
    .bind(id)
    .bind(full_name)
    .bind(document)
    .bind(course_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load enrollments from a `id,full_name,document,course_id` CSV.
pub async fn import_roster(pool: &PgPool, csv_path: &std::path::Path) -> Result<usize, GradeError> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        id: String,
        full_name: String,
        #[serde(default)]
        document: String,
        course_id: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|err| GradeError::Validation(format!("{}: {err}", csv_path.display())))?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result.map_err(|err| GradeError::Validation(err.to_string()))?;
        upsert_student(pool, &row.id, &row.full_name, &row.document, &row.course_id).await?;
        imported += 1;
    }

    Ok(imported)
}

/// `GradeBackend` over the `gradebook` Postgres schema.
///
/// Scores are a nullable column here, so nothing stands in for "unset".
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<GradeRecord, GradeError> {
    let id: Uuid = row.get("id");
    let raw_period: String = row.get("period");
    let period = Period::parse(&raw_period)
        .map_err(|err| GradeError::Decode(format!("record {id}: {err}")))?;
    let score: Option<f64> = row.get("score");

    Ok(GradeRecord {
        id: id.to_string(),
        key: GradeKey {
            student_id: row.get("student_id"),
            subject_id: row.get("subject_id"),
            course_id: row.get("course_id"),
            period,
        },
        score: score.map(Score::new_unchecked),
        note: row.get("note"),
    })
}

fn parse_record_id(operation: &'static str, id: &str) -> Result<Uuid, GradeError> {
    Uuid::parse_str(id).map_err(|_| GradeError::domain(operation, format!("no record {id}")))
}

#[async_trait]
impl GradeBackend for PgBackend {
    async fn list_grade_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<GradeRecord>, GradeError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM gradebook.grade_records \
             WHERE ($1::text IS NULL OR course_id = $1) \
             AND ($2::text IS NULL OR subject_id = $2) \
             AND ($3::text IS NULL OR student_id = $3) \
             AND ($4::text IS NULL OR period = $4) \
             ORDER BY course_id, subject_id, period, student_id"
        );
        let rows = sqlx::query(&query)
            .bind(filter.course_id.as_deref())
            .bind(filter.subject_id.as_deref())
            .bind(filter.student_id.as_deref())
            .bind(filter.period.as_ref().map(Period::as_str))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn create_grade_record(
        &self,
        record: &NewGradeRecord,
    ) -> Result<GradeRecord, GradeError> {
        let query = format!(
            "INSERT INTO gradebook.grade_records \
             (id, student_id, subject_id, course_id, period, score, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (student_id, subject_id, course_id, period) DO NOTHING \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&record.key.student_id)
            .bind(&record.key.subject_id)
            .bind(&record.key.course_id)
            .bind(record.key.period.as_str())
            .bind(record.score.map(Score::value))
            .bind(&record.note)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(GradeError::domain(
                "createGradeRecord",
                format!("grade record {} already exists", record.key),
            )),
        }
    }

    async fn update_grade_record(
        &self,
        id: &str,
        update: &RecordUpdate,
    ) -> Result<GradeRecord, GradeError> {
        let record_id = parse_record_id("updateGradeRecord", id)?;
        let query = format!(
            "UPDATE gradebook.grade_records \
             SET score = COALESCE($2, score), note = COALESCE($3, note), updated_at = now() \
             WHERE id = $1 \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(record_id)
            .bind(update.score.map(Score::value))
            .bind(update.note.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(GradeError::domain("updateGradeRecord", format!("no record {id}"))),
        }
    }

    async fn delete_grade_record(&self, id: &str) -> Result<(), GradeError> {
        let record_id = parse_record_id("deleteGradeRecord", id)?;
        let result = sqlx::query("DELETE FROM gradebook.grade_records WHERE id = $1")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GradeError::domain("deleteGradeRecord", format!("no record {id}")));
        }
        Ok(())
    }

    async fn list_roster(&self, course_id: &str) -> Result<Vec<Student>, GradeError> {
        let rows = sqlx::query(
            "SELECT id, full_name, document FROM gradebook.students \
             WHERE course_id = $1 ORDER BY full_name",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Student {
                id: row.get("id"),
                full_name: row.get("full_name"),
                document: row.get("document"),
            })
            .collect())
    }

    async fn list_subject_catalog(&self) -> Result<Vec<Subject>, GradeError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.name,
                   COALESCE(
                       array_agg(st.teacher_id ORDER BY st.teacher_id)
                           FILTER (WHERE st.teacher_id IS NOT NULL),
                       '{}'
                   ) AS teacher_ids
            FROM gradebook.subjects s
            LEFT JOIN gradebook.subject_teachers st ON st.subject_id = s.id
            GROUP BY s.id, s.name
            ORDER BY s.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Subject {
                id: row.get("id"),
                name: row.get("name"),
                teacher_ids: row.get("teacher_ids"),
            })
            .collect())
    }

    async fn list_teachers(&self) -> Result<Vec<Teacher>, GradeError> {
        let rows = sqlx::query("SELECT id, name FROM gradebook.teachers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Teacher {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}
