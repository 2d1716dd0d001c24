//! 领域内容 <-> 协议内容
//!
//! 协议侧的空 Part 视为空文本；FunctionCall 的 args 在协议侧为 JSON 字符串，解析失败时原样放入 {"raw": ...}。

use std::time::Duration;

use serde_json::Value;

use crate::models::{
    Blob, CodeExecutionResult, Content, ExecutableCode, FileData, FunctionCall, FunctionResponse,
    Part, Role, VideoMetadata,
};
use crate::protocol::{
    PartData, ProtoBlob, ProtoCodeExecutionResult, ProtoContent, ProtoExecutableCode,
    ProtoFileData, ProtoFunctionCall, ProtoFunctionResponse, ProtoPart, ProtoVideoMetadata,
};

fn opt_string(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn part_to_proto(part: &Part) -> ProtoPart {
    let data = match part {
        Part::Text(t) => PartData::Text(t.clone()),
        Part::InlineData(b) => PartData::InlineData(ProtoBlob {
            display_name: b.display_name.clone().unwrap_or_default(),
            data: b.data.clone(),
            mime_type: b.mime_type.clone(),
        }),
        Part::FileData(f) => PartData::FileData(ProtoFileData {
            display_name: f.display_name.clone().unwrap_or_default(),
            file_uri: f.file_uri.clone(),
            mime_type: f.mime_type.clone(),
        }),
        Part::FunctionCall(fc) => PartData::FunctionCall(ProtoFunctionCall {
            id: fc.id.clone().unwrap_or_default(),
            name: fc.name.clone(),
            args_json: if fc.args.is_null() {
                String::new()
            } else {
                fc.args.to_string()
            },
        }),
        Part::FunctionResponse(fr) => PartData::FunctionResponse(ProtoFunctionResponse {
            id: fr.id.clone().unwrap_or_default(),
            name: fr.name.clone(),
            response: fr.response.clone(),
        }),
        Part::CodeExecutionResult(r) => PartData::CodeExecutionResult(ProtoCodeExecutionResult {
            outcome: r.outcome.clone(),
            output: r.output.clone(),
        }),
        Part::ExecutableCode(c) => PartData::ExecutableCode(ProtoExecutableCode {
            code: c.code.clone(),
            language: c.language.clone(),
        }),
        Part::VideoMetadata(v) => PartData::VideoMetadata(ProtoVideoMetadata {
            fps: v.fps,
            start_offset_ms: v.start_offset.map(|d| d.as_millis() as u64),
            end_offset_ms: v.end_offset.map(|d| d.as_millis() as u64),
        }),
    };
    ProtoPart { data: Some(data) }
}

fn part_from_proto(part: &ProtoPart) -> Part {
    let Some(data) = &part.data else {
        return Part::default();
    };
    match data {
        PartData::Text(t) => Part::Text(t.clone()),
        PartData::InlineData(b) => Part::InlineData(Blob {
            display_name: opt_string(b.display_name.clone()),
            data: b.data.clone(),
            mime_type: b.mime_type.clone(),
        }),
        PartData::FileData(f) => Part::FileData(FileData {
            display_name: opt_string(f.display_name.clone()),
            file_uri: f.file_uri.clone(),
            mime_type: f.mime_type.clone(),
        }),
        PartData::FunctionCall(fc) => Part::FunctionCall(FunctionCall {
            id: opt_string(fc.id.clone()),
            name: fc.name.clone(),
            args: parse_args(&fc.args_json),
        }),
        PartData::FunctionResponse(fr) => Part::FunctionResponse(FunctionResponse {
            id: opt_string(fr.id.clone()),
            name: fr.name.clone(),
            response: fr.response.clone(),
        }),
        PartData::CodeExecutionResult(r) => Part::CodeExecutionResult(CodeExecutionResult {
            outcome: r.outcome.clone(),
            output: r.output.clone(),
        }),
        PartData::ExecutableCode(c) => Part::ExecutableCode(ExecutableCode {
            code: c.code.clone(),
            language: c.language.clone(),
        }),
        PartData::VideoMetadata(v) => Part::VideoMetadata(VideoMetadata {
            fps: v.fps,
            start_offset: v.start_offset_ms.map(Duration::from_millis),
            end_offset: v.end_offset_ms.map(Duration::from_millis),
        }),
    }
}

fn parse_args(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }))
}

pub fn content_to_proto(content: &Content) -> ProtoContent {
    ProtoContent {
        role: content.role.as_str().to_string(),
        parts: content.parts.iter().map(part_to_proto).collect(),
    }
}

pub fn content_from_proto(content: &ProtoContent) -> Content {
    Content {
        role: Role::parse(&content.role),
        parts: content.parts.iter().map(part_from_proto).collect(),
    }
}

pub fn contents_to_proto(contents: &[Content]) -> Vec<ProtoContent> {
    contents.iter().map(content_to_proto).collect()
}

pub fn contents_from_proto(contents: &[ProtoContent]) -> Vec<Content> {
    contents.iter().map(content_from_proto).collect()
}
