/// Errors and warnings collected while reading a definition and loading its samples.
///
/// Unsupported features are recorded once each, as an `unsupported opcode: <name>` warning.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    errors: Vec<String>,
    warnings: Vec<String>,
    unsupported: Vec<String>,
}

impl Diagnostics {
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.errors.push(message);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn add_unsupported(&mut self, opcode: impl Into<String>) {
        let opcode = opcode.into();
        if self.unsupported.contains(&opcode) {
            return;
        }
        log::debug!("unsupported opcode: {opcode}");
        self.warnings.push(format!("unsupported opcode: {opcode}"));
        self.unsupported.push(opcode);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn unsupported_opcodes(&self) -> &[String] {
        &self.unsupported
    }

    pub fn dump(&self) -> String {
        let mut info = String::new();
        if self.errors.is_empty() {
            info.push_str("no errors.\n\n");
        } else {
            info.push_str(&format!("{} errors: \n", self.errors.len()));
            info.push_str(&self.errors.join("\n"));
            info.push('\n');
        }
        if self.warnings.is_empty() {
            info.push_str("no warnings.\n");
        } else {
            info.push_str(&format!("{} warnings: \n", self.warnings.len()));
            info.push_str(&self.warnings.join("\n"));
            info.push('\n');
        }
        info
    }
}
