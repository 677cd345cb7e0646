use std::fmt;

#[derive(Debug)]
pub enum Error {
    InvalidModel(String),
    Json(serde_json::Error),
    Zip(zip::result::ZipError),
    Image(image::ImageError),
    Pdf(String),
    Io(std::io::Error),
    UnknownOrientation(String),
    ObjectNotFound(String),
    NotFloating(String),
    NoTextField(String),
    GestureRejected(String),
    PrintSurfaceBlocked,
    Host(String),
    ExportInProgress,
    Cancelled,
    Storage(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidModel(reason) => write!(f, "not a valid document model: {reason}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Zip(e) => write!(f, "ZIP error: {e}"),
            Error::Image(e) => write!(f, "image error: {e}"),
            Error::Pdf(e) => write!(f, "PDF error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::UnknownOrientation(value) => {
                write!(f, "unknown page orientation '{value}' (expected portrait or landscape)")
            }
            Error::ObjectNotFound(id) => write!(f, "no page object with id '{id}'"),
            Error::NotFloating(id) => write!(f, "page object '{id}' is not floating"),
            Error::NoTextField(id) => write!(f, "page object '{id}' has no text field"),
            Error::GestureRejected(reason) => write!(f, "gesture rejected: {reason}"),
            Error::PrintSurfaceBlocked => write!(
                f,
                "the print window was blocked; allow pop-ups for this page and try again"
            ),
            Error::Host(e) => write!(f, "host error: {e}"),
            Error::ExportInProgress => write!(f, "an export is already running for this document"),
            Error::Cancelled => write!(f, "export cancelled"),
            Error::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Zip(e)
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
