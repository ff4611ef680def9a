//! Wire protocol: flat JSON request objects in, flat JSON responses out,
//! one per line. The dispatcher validates the session up front, routes to
//! the service, and maps domain errors onto the integer taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::FsError;
use crate::record::UserRole;
use crate::service::Service;

/// Credentials carried by `user_login`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// One request frame. Every field the client omits defaults to
/// empty/zero; handlers only look at the fields their operation uses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub role: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
    #[serde(default)]
    pub permissions: u32,
    #[serde(default)]
    pub payload: Payload,
}

/// One response frame: `status`, `code`, the echoed `operation` and
/// `request_id`, and either `data` or `error_message`.
#[derive(Debug, Serialize)]
pub struct Response {
    pub status: &'static str,
    pub code: i32,
    pub operation: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Response {
    fn success(req: &Request, data: Option<Value>) -> Response {
        Response {
            status: "success",
            code: 0,
            operation: req.operation.clone(),
            request_id: req.request_id.clone(),
            data,
            error_message: None,
        }
    }

    fn failure(req: &Request, err: &FsError) -> Response {
        Response {
            status: "error",
            code: err.code(),
            operation: req.operation.clone(),
            request_id: req.request_id.clone(),
            data: None,
            error_message: Some(err.to_string()),
        }
    }
}

fn unit_response(req: &Request, result: crate::error::Result<()>) -> Response {
    match result {
        Ok(()) => Response::success(req, None),
        Err(e) => Response::failure(req, &e),
    }
}

/// Routes one request through the service. Everything except
/// `user_login` requires a valid session before any domain work runs.
pub fn dispatch(service: &mut Service, req: &Request) -> Response {
    if req.operation != "user_login" && !service.validate_session(&req.session_id) {
        return Response::failure(req, &FsError::InvalidSession);
    }

    match req.operation.as_str() {
        "user_login" => {
            match service.user_login(&req.payload.username, &req.payload.password) {
                Ok(session_id) => {
                    Response::success(req, Some(json!({ "session_id": session_id })))
                }
                Err(e) => Response::failure(req, &e),
            }
        }
        "user_logout" => unit_response(req, service.user_logout(&req.session_id)),
        "user_create" => unit_response(
            req,
            service.user_create(
                &req.session_id,
                &req.username,
                &req.password_hash,
                UserRole::from_u32(req.role),
            ),
        ),
        "user_delete" => unit_response(req, service.user_delete(&req.session_id, &req.username)),
        "user_list" => match service.user_list(&req.session_id) {
            Ok(users) => {
                let rows: Vec<Value> = users
                    .iter()
                    .map(|u| {
                        json!({
                            "username": u.username,
                            "role": u.role as u32,
                            "created_time": u.created_time,
                            "last_login": u.last_login,
                            "is_active": u.is_active,
                        })
                    })
                    .collect();
                Response::success(req, Some(json!({ "users": rows })))
            }
            Err(e) => Response::failure(req, &e),
        },
        "dir_create" => unit_response(req, service.dir_create(&req.path)),
        "dir_delete" => unit_response(req, service.dir_delete(&req.path)),
        "dir_exists" => {
            Response::success(req, Some(json!({ "exists": service.dir_exists(&req.path) })))
        }
        "dir_list" => {
            Response::success(req, Some(json!({ "entries": service.dir_list(&req.path) })))
        }
        "file_create" => unit_response(req, service.file_create(&req.path, req.size)),
        "file_delete" => unit_response(req, service.file_delete(&req.path)),
        "file_read" => match service.file_read(&req.path) {
            Ok(content) => Response::success(
                req,
                Some(json!({ "content": String::from_utf8_lossy(&content) })),
            ),
            Err(e) => Response::failure(req, &e),
        },
        "file_edit" => unit_response(
            req,
            service.file_edit(&req.path, req.data.as_bytes(), req.index),
        ),
        "file_truncate" => unit_response(req, service.file_truncate(&req.path, req.size)),
        "file_rename" => unit_response(req, service.file_rename(&req.old_path, &req.new_path)),
        "file_exists" => Response::success(
            req,
            Some(json!({ "exists": service.file_exists(&req.path) })),
        ),
        "get_metadata" => match service.get_metadata(&req.path) {
            Ok(meta) => Response::success(
                req,
                Some(json!({
                    "path": meta.path,
                    "size": meta.entry.size,
                    "blocks_used": meta.blocks_used,
                    "actual_size": meta.actual_size,
                    "owner": meta.entry.owner,
                })),
            ),
            Err(e) => Response::failure(req, &e),
        },
        "set_permissions" => {
            unit_response(req, service.set_permissions(&req.path, req.permissions))
        }
        "get_stats" => {
            let stats = service.get_stats();
            Response::success(
                req,
                Some(json!({
                    "total_size": stats.total_size,
                    "used_space": stats.used_space,
                    "free_space": stats.free_space,
                    "total_files": stats.total_files,
                    "total_directories": stats.total_directories,
                    "total_users": stats.total_users,
                    "active_sessions": stats.active_sessions,
                    "fragmentation": stats.fragmentation,
                })),
            )
        }
        _ => Response {
            status: "error",
            code: FsError::InvalidOperation.code(),
            operation: req.operation.clone(),
            request_id: req.request_id.clone(),
            data: None,
            error_message: Some(format!("Unknown operation: {}", req.operation)),
        },
    }
}
