use crate::command::store::database::schema::{Conversation, Document, Form, PersonalData, User};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

mod pdf;

pub use pdf::{conversations_pdf, documents_pdf};

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to finish csv: {0}")]
    CsvFlush(String),

    #[error("failed to render pdf: {0}")]
    Pdf(String),
}

/// A tabular report: one header row and any number of data rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Report {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: vec![],
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, ReportError> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(vec![]);

        writer.write_record(&self.headers)?;

        for row in &self.rows {
            writer.write_record(row)?;
        }

        writer
            .into_inner()
            .map_err(|err| ReportError::CsvFlush(err.to_string()))
    }
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_optional_timestamp(value: Option<&DateTime<Utc>>) -> String {
    value.map(format_timestamp).unwrap_or_default()
}

fn address_field(address: Option<&Value>, key: &str) -> String {
    address
        .and_then(|address| address.get(key))
        .map(|value| match value {
            Value::String(value) => value.clone(),
            Value::Null => String::new(),
            value => value.to_string(),
        })
        .unwrap_or_default()
}

pub fn users_report(users: &[User], include_address: bool) -> Report {
    let mut headers = vec![
        "Full Name",
        "Email",
        "CPF",
        "RG",
        "Phone",
        "Birth Date",
        "Registered At",
    ];

    if include_address {
        headers.extend(["CEP", "Street", "Number", "District", "City", "State"]);
    }

    let mut report = Report::new(headers);

    for user in users {
        let mut row = vec![
            user.name.clone(),
            user.email.clone(),
            user.cpf.clone().unwrap_or_default(),
            user.rg.clone().unwrap_or_default(),
            user.phone.clone().unwrap_or_default(),
            user.birth_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            format_timestamp(&user.created_at),
        ];

        if include_address {
            let address = user.address.as_ref();

            for key in ["cep", "endereco", "numero", "bairro", "cidade", "estado"] {
                row.push(address_field(address, key));
            }
        }

        report.push(row);
    }

    report
}

/// `conversations` pairs each row with its message count.
pub fn conversations_report(conversations: &[(Conversation, i64)], include_messages: bool) -> Report {
    let mut headers = vec!["Conversation ID", "Title", "User ID", "Created At"];

    if include_messages {
        headers.push("Message Count");
    }

    let mut report = Report::new(headers);

    for (conversation, count) in conversations {
        let mut row = vec![
            conversation.id.to_string(),
            conversation
                .title
                .clone()
                .unwrap_or_else(|| "Untitled".to_string()),
            conversation
                .user_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            format_timestamp(&conversation.created_at),
        ];

        if include_messages {
            row.push(count.to_string());
        }

        report.push(row);
    }

    report
}

pub fn documents_report(documents: &[Document], include_extracted: bool) -> Report {
    let mut headers = vec![
        "ID",
        "Original Name",
        "File Type",
        "Size (bytes)",
        "Processed At",
        "Uploaded At",
    ];

    if include_extracted {
        headers.extend([
            "Extracted Name",
            "Extracted CPF",
            "Extracted Email",
            "Extracted Phone",
        ]);
    }

    let mut report = Report::new(headers);

    for document in documents {
        let mut row = vec![
            document.id.to_string(),
            document.original_name.clone(),
            document.mime_type.clone().unwrap_or_default(),
            document.size.unwrap_or_default().to_string(),
            format_optional_timestamp(document.processed_at.as_ref()),
            format_timestamp(&document.created_at),
        ];

        if include_extracted {
            let data = document.personal_data().unwrap_or_default();

            row.extend([
                data.nome_completo.unwrap_or_default(),
                data.cpf.unwrap_or_default(),
                data.email.unwrap_or_default(),
                data.telefone.unwrap_or_default(),
            ]);
        }

        report.push(row);
    }

    report
}

pub fn forms_report(forms: &[Form]) -> Report {
    let mut report = Report::new([
        "ID",
        "Form Type",
        "Full Name",
        "CPF",
        "Email",
        "Phone",
        "Confidence (%)",
        "Validated",
        "Created At",
    ]);

    for form in forms {
        let data = PersonalData::from_value(&form.form_data);

        report.push(vec![
            form.id.to_string(),
            form.form_type.clone(),
            data.nome_completo.unwrap_or_default(),
            data.cpf.unwrap_or_default(),
            data.email.unwrap_or_default(),
            data.telefone.unwrap_or_default(),
            form.confidence.unwrap_or_default().to_string(),
            if form.is_validated { "Yes" } else { "No" }.to_string(),
            format_timestamp(&form.created_at),
        ]);
    }

    report
}
