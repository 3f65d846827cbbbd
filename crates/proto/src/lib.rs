//! Response envelopes shared by every front end.
//!
//! Success: `{"status":"ok", ...payload fields}`.
//! Failure: `{"status":"error","error":{"code":404,"kind":"E_NOT_FOUND","message":"..."}}`.

use fragments_core::{CoreError, Fragment, FragmentListing, TypeRegistry};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Serialize, Debug, Clone)]
pub struct SuccessResponse<T> {
    pub status: Status,
    #[serde(flatten)]
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> SuccessResponse<T> {
    SuccessResponse {
        status: Status::Ok,
        data,
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    /// HTTP-equivalent status.
    pub code: u16,
    /// Stable machine code, e.g. `E_NOT_FOUND`.
    pub kind: String,
    pub message: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: Status,
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn new(code: u16, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error: ErrorBody {
                code,
                kind: kind.into(),
                message: message.into(),
            },
        }
    }
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        Self::new(err.status(), err.code(), err.to_string())
    }
}

/// Fragment metadata plus the representations it can be read as.
#[derive(Serialize, Debug, Clone)]
pub struct FragmentInfo {
    #[serde(flatten)]
    pub fragment: Fragment,
    pub formats: Vec<String>,
}

impl FragmentInfo {
    pub fn new(fragment: Fragment, registry: &TypeRegistry) -> Self {
        let formats = fragment.formats(registry).to_vec();
        Self { fragment, formats }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FragmentBody {
    pub fragment: FragmentInfo,
}

#[derive(Serialize, Debug, Clone)]
pub struct ListBody {
    pub fragments: FragmentListing,
}

#[derive(Serialize, Debug, Clone)]
pub struct FormatsBody {
    #[serde(rename = "type")]
    pub media_type: String,
    pub formats: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct DeletedBody {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragments_core::{hash_identity, ValidationError};
    use serde_json::json;

    #[test]
    fn success_envelope_flattens_payload() {
        let v = serde_json::to_value(ok(DeletedBody { id: "abc".into() })).unwrap();
        assert_eq!(v, json!({"status": "ok", "id": "abc"}));
    }

    #[test]
    fn error_envelope_carries_status_and_kind() {
        let err = CoreError::from(ValidationError::EmptyData);
        let v = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"]["code"], 400);
        assert_eq!(v["error"]["kind"], "E_EMPTY_DATA");
        assert_eq!(v["error"]["message"], err.to_string());
    }

    #[test]
    fn fragment_info_lists_formats() {
        let reg = TypeRegistry::standard();
        let owner = hash_identity("user@example.com").unwrap();
        let f = Fragment::new(owner, "text/markdown", &reg).unwrap();
        let v = serde_json::to_value(ok(FragmentBody {
            fragment: FragmentInfo::new(f.clone(), &reg),
        }))
        .unwrap();
        assert_eq!(v["fragment"]["id"], f.id());
        assert_eq!(v["fragment"]["type"], "text/markdown");
        assert_eq!(
            v["fragment"]["formats"],
            json!(["text/markdown", "text/html", "text/plain"])
        );
    }

    #[test]
    fn listings_serialize_as_arrays() {
        let body = ListBody {
            fragments: FragmentListing::Ids(vec!["a".into(), "b".into()]),
        };
        let v = serde_json::to_value(ok(body)).unwrap();
        assert_eq!(v["fragments"], json!(["a", "b"]));
    }
}
