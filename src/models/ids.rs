//! Entity ID generation: `<prefix>-<8 hex chars>`.

use uuid::Uuid;

fn generate(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..8])
}

pub fn generate_template_id() -> String {
    generate("tpl")
}

pub fn generate_field_id() -> String {
    generate("fld")
}

pub fn generate_project_id() -> String {
    generate("proj")
}

pub fn generate_file_id() -> String {
    generate("file")
}

pub fn generate_run_id() -> String {
    generate("run")
}

pub fn generate_result_id() -> String {
    generate("res")
}
