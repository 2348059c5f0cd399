use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Host unreachable after the retry budget was spent.
    #[error("Unable to connect to Envoy. Check that the device is up at 'http://{host}' ({message}).")]
    Connectivity { host: String, message: String },

    /// None of the probe endpoints answered in a recognisable way.
    #[error("Could not connect or determine Envoy model. Check that the device is up at 'http://{host}'.")]
    Detection { host: String },

    /// Inverters endpoint rejected the digest credentials.
    #[error("Authentication to '{endpoint}' failed: {message}")]
    Authentication { endpoint: String, message: String },

    /// JSON decode failure, missing key or regex non-match. `text` is the offending payload.
    #[error("Could not parse {context}: {text}")]
    Parse { context: String, text: String },

    #[error("Got HTTP {status} from '{endpoint}'")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse(context: impl Into<String>, text: impl Into<String>) -> Self {
        Error::Parse {
            context: context.into(),
            text: text.into(),
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse { .. })
    }
}

fn html_response(status: Status, title: &str, detail: String) -> response::Result<'static> {
    let body = format!(
        "<html><body><h3>{}</h3>Downstream Envoy response: <code>{}</code></body></html>",
        title, detail
    );
    Response::build()
        .status(status)
        .sized_body(body.len(), Cursor::new(body))
        .header(ContentType::new("text", "html"))
        .ok()
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::Authentication { .. } => {
                html_response(Status::Forbidden, "403 Forbidden", self.to_string())
            }
            Error::Connectivity { .. } | Error::Detection { .. } => {
                html_response(Status::BadGateway, "502 Bad Gateway", self.to_string())
            }
            _ => html_response(
                Status::InternalServerError,
                "Unknown exception",
                format!("{:?}", self),
            ),
        }
    }
}
