//! Test to trigger ts-rs bindings export
//! Run with: cargo test export_bindings

#[cfg(test)]
mod tests {
    use crate::shared::error::ErrorKind;
    use crate::shared::events::TranslationEvent;
    use ts_rs::TS;

    #[test]
    fn export_bindings() {
        // Event payloads and the error kind the frontend switches on
        TranslationEvent::export_all().expect("Failed to export TranslationEvent");
        ErrorKind::export().expect("Failed to export ErrorKind");
    }

    #[test]
    fn error_kind_binding_is_string_union() {
        let decl = ErrorKind::decl();
        assert!(decl.contains("\"model_not_ready\""));
        assert!(decl.contains("\"out_of_memory\""));
    }
}
