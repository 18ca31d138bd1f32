use crate::activity;
use crate::ipc::helpers::{get_object, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{AppSettings, AttendanceFormat, APP_SETTINGS_ID};
use crate::store::{self, Collection, Fields};
use serde_json::{json, Value};

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_settings_patch(current: &mut AppSettings, patch: &Fields) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "attendanceFormat" => {
                let raw = parse_string_max(v, k, 16)?;
                current.attendance_format = AttendanceFormat::parse(&raw)
                    .ok_or_else(|| "attendanceFormat must be one of: default, simple, compact".to_string())?;
            }
            "enableGoogleSheets" => {
                current.enable_google_sheets = parse_bool(v, k)?;
            }
            "googleSheetsUrl" => {
                let url = parse_string_max(v, k, 2048)?;
                if !url.is_empty() && !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err("googleSheetsUrl must be an http(s) URL".into());
                }
                current.google_sheets_url = url;
            }
            _ => return Err(format!("unknown settings field: {}", k)),
        }
    }
    if current.enable_google_sheets && current.google_sheets_url.is_empty() {
        return Err("googleSheetsUrl is required when enableGoogleSheets is on".into());
    }
    Ok(())
}

fn load_settings(state: &AppState) -> Result<AppSettings, HandlerErr> {
    let conn = require_db(state)?;
    let doc = store::get(conn, Collection::Settings, APP_SETTINGS_ID).map_err(HandlerErr::query)?;
    Ok(AppSettings::from_document(doc.as_ref()))
}

fn settings_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    Ok(json!({ "settings": load_settings(state)?.to_json() }))
}

fn settings_update(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let patch = get_object(params, "patch")?;
    let mut current = load_settings(state)?;
    merge_settings_patch(&mut current, &patch).map_err(HandlerErr::bad_params)?;
    let conn = require_db(state)?;
    store::set(
        conn,
        Collection::Settings,
        APP_SETTINGS_ID,
        store::fields(current.to_json()),
        true,
    )
    .map_err(HandlerErr::update)?;
    activity::record(conn, "updated settings", "attendance sync");
    log::info!(
        "settings updated (format {}, sync {})",
        current.attendance_format.as_str(),
        if current.sync_target().is_some() { "on" } else { "off" }
    );
    Ok(json!({ "settings": current.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "settings.get" => settings_get(state),
        "settings.update" => settings_update(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Fields {
        store::fields(v)
    }

    #[test]
    fn patch_validates_each_field() {
        let mut s = AppSettings::default();
        merge_settings_patch(
            &mut s,
            &patch(json!({ "attendanceFormat": "Compact", "googleSheetsUrl": " https://hook.test/x ", "enableGoogleSheets": true })),
        )
        .expect("valid patch");
        assert_eq!(s.attendance_format, AttendanceFormat::Compact);
        assert_eq!(s.google_sheets_url, "https://hook.test/x");

        let mut s = AppSettings::default();
        assert!(merge_settings_patch(&mut s, &patch(json!({ "attendanceFormat": "fancy" }))).is_err());
        assert!(merge_settings_patch(&mut s, &patch(json!({ "enableGoogleSheets": "yes" }))).is_err());
        assert!(merge_settings_patch(&mut s, &patch(json!({ "theme": "dark" }))).is_err());
        assert!(merge_settings_patch(&mut s, &patch(json!({ "googleSheetsUrl": "ftp://x" }))).is_err());
    }

    #[test]
    fn enabling_sync_needs_a_url() {
        let mut s = AppSettings::default();
        let res = merge_settings_patch(&mut s, &patch(json!({ "enableGoogleSheets": true })));
        assert!(res.is_err());
    }
}
