//! Textual rendering of an instruction stream.
//!
//! Produces one line per instruction in the usual `IL_<offset>: <mnemonic> <operand>`
//! form. Branch operands are shown as the `IL_xxxx` offset their label resolved to, or by
//! label name if it was never marked. Structural markers are hidden unless requested.
//!
//! ```text
//! IL_0000: ldarg.0
//! IL_0001: brtrue IL_0009
//! IL_0006: ldc.i4.s 42
//! IL_0008: ret
//! IL_0009: ldc.i4.0
//! IL_000a: ret
//! ```

use std::{collections::HashMap, fmt};

use crate::assembly::{
    instruction::{Instruction, Operand},
    stream::{InstructionStream, Line},
};

/// Display options for disassembly output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisassemblyOptions {
    /// Prefix every line with `IL_<offset>:`
    pub offsets: bool,
    /// Render label, local and region markers as comment lines
    pub markers: bool,
    /// Append raw metadata tokens to member operands
    pub tokens: bool,
}

impl Default for DisassemblyOptions {
    fn default() -> Self {
        DisassemblyOptions {
            offsets: true,
            markers: false,
            tokens: false,
        }
    }
}

impl DisassemblyOptions {
    /// Everything enabled; useful when debugging a generator.
    #[must_use]
    pub fn verbose() -> Self {
        DisassemblyOptions {
            offsets: true,
            markers: true,
            tokens: true,
        }
    }
}

/// Formats an [`InstructionStream`] as text.
///
/// # Examples
///
/// ```rust
/// use cilemit::prelude::*;
///
/// let mut asm = RecordingAssembler::new();
/// asm.emit_i32(OpCode::LdcI4, 5)?.emit_i32(OpCode::LdcI4, 7)?.emit(OpCode::Add)?.ret()?;
///
/// let text = Disassembler::new(DisassemblyOptions::default()).render(asm.stream());
/// assert_eq!(
///     text,
///     "IL_0000: ldc.i4 5\nIL_0005: ldc.i4 7\nIL_000a: add\nIL_000b: ret\n"
/// );
/// # Ok::<(), cilemit::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Disassembler {
    options: DisassemblyOptions,
}

impl Disassembler {
    /// Creates a disassembler with `options`.
    #[must_use]
    pub fn new(options: DisassemblyOptions) -> Self {
        Disassembler { options }
    }

    /// The active options.
    #[must_use]
    pub fn options(&self) -> &DisassemblyOptions {
        &self.options
    }

    /// Renders the whole stream into a string.
    #[must_use]
    pub fn render(&self, stream: &InstructionStream) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_to(stream, &mut out);
        out
    }

    /// Writes the whole stream to `w`.
    ///
    /// # Errors
    ///
    /// Propagates errors from `w`.
    pub fn write_to<W: fmt::Write + ?Sized>(
        &self,
        stream: &InstructionStream,
        w: &mut W,
    ) -> fmt::Result {
        let labels = stream.label_offsets();
        for line in stream {
            self.write_line(line, &labels, w)?;
        }
        Ok(())
    }

    fn write_line<W: fmt::Write + ?Sized>(
        &self,
        line: &Line,
        labels: &HashMap<u32, u32>,
        w: &mut W,
    ) -> fmt::Result {
        let text = match line.instruction() {
            Instruction::Op(op) => {
                let operand = self.format_operand(op.operand(), labels);
                if operand.is_empty() {
                    op.opcode().mnemonic().to_string()
                } else {
                    format!("{} {operand}", op.opcode())
                }
            }
            marker if self.options.markers => format!("// {}", Self::format_marker(marker)),
            _ => return Ok(()),
        };

        if self.options.offsets {
            write!(w, "IL_{:04x}: ", line.offset())?;
        }
        writeln!(w, "{text}")
    }

    fn format_marker(marker: &Instruction) -> String {
        match marker {
            Instruction::DefineLabel(label) => format!(".label {label}"),
            Instruction::MarkLabel(label) => format!("{label}:"),
            Instruction::DeclareLocal(local) => {
                let pinned = if local.is_pinned() { " pinned" } else { "" };
                format!(".local {local} {}{pinned}", local.ty())
            }
            Instruction::BeginExceptionBlock(exit) => format!(".try {{ // exit {exit}"),
            Instruction::BeginCatchBlock(Some(ty)) => format!("}} catch {ty} {{"),
            Instruction::BeginCatchBlock(None) => "} catch {".to_string(),
            Instruction::BeginExceptFilterBlock => "} filter {".to_string(),
            Instruction::BeginFinallyBlock => "} finally {".to_string(),
            Instruction::BeginFaultBlock => "} fault {".to_string(),
            Instruction::EndExceptionBlock(exit) => format!("}} // end .try, {exit}:"),
            Instruction::BeginScope => "{".to_string(),
            Instruction::EndScope => "}".to_string(),
            Instruction::Op(op) => op.opcode().mnemonic().to_string(),
        }
    }

    fn format_operand(&self, operand: &Operand, labels: &HashMap<u32, u32>) -> String {
        let target = |label: &crate::assembly::Label| match labels.get(&label.index()) {
            Some(offset) => format!("IL_{offset:04x}"),
            None => label.to_string(),
        };
        let member = |name: &str, token: crate::metadata::token::Token| {
            if self.options.tokens {
                format!("{name} /* 0x{:08X} */", token.value())
            } else {
                name.to_string()
            }
        };

        match operand {
            Operand::None => String::new(),
            Operand::Int8(v) => format!("{v}"),
            Operand::UInt8(v) => format!("{v}"),
            Operand::UInt16(v) => format!("{v}"),
            Operand::Int32(v) => format!("{v}"),
            Operand::Int64(v) => format!("{v}"),
            // Debug keeps the decimal part: `1.0`, not `1`
            Operand::Float32(v) => format!("{v:?}"),
            Operand::Float64(v) => format!("{v:?}"),
            Operand::String(s) => format!("{s:?}"),
            Operand::Label(label) => target(label),
            Operand::Labels(targets) => {
                let targets: Vec<String> = targets.iter().map(target).collect();
                format!("({})", targets.join(", "))
            }
            Operand::Local(local) => local.to_string(),
            Operand::Field(field) => member(field.name(), field.token()),
            Operand::Constructor(ctor) => member(ctor.name(), ctor.token()),
            Operand::Method(method) => member(method.name(), method.token()),
            Operand::Type(ty) => member(ty.name(), ty.token()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{EmitExt, Emitter, OpCode, RecordingAssembler},
        metadata::{
            handles::{MethodHandle, TypeHandle},
            token::Token,
        },
        Result,
    };

    #[test]
    fn test_branch_targets_resolve_to_offsets() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let other = asm.define_label();
        asm.ldarg(0)?
            .emit_label(OpCode::Brtrue, &other)?
            .ldc_i4(42)?
            .ret()?
            .mark_label(&other)?
            .ldc_i4(0)?
            .ret()?;

        let text = asm.stream().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "IL_0000: ldarg.0",
                "IL_0001: brtrue IL_0009",
                "IL_0006: ldc.i4.s 42",
                "IL_0008: ret",
                "IL_0009: ldc.i4.0",
                "IL_000a: ret",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_markers_and_tokens() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let ty = TypeHandle::new(Token::new(0x0100_0002), "System.String");
        let write = MethodHandle::new(Token::new(0x0A00_0001), "System.Console::WriteLine");
        let text_local = asm.declare_named_local(ty, false, "text");

        asm.emit_string(OpCode::Ldstr, "hi \"there\"")?
            .stloc(&text_local)?
            .ldloc(&text_local)?
            .emit_method(OpCode::Call, &write)?
            .ret()?;

        let text = Disassembler::new(DisassemblyOptions::verbose()).render(asm.stream());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "IL_0000: // .local text System.String");
        assert_eq!(lines[1], "IL_0000: ldstr \"hi \\\"there\\\"\"");
        assert_eq!(lines[2], "IL_0005: stloc.s text");
        assert_eq!(
            lines[4],
            "IL_0009: call System.Console::WriteLine /* 0x0A000001 */"
        );
        Ok(())
    }

    #[test]
    fn test_float_operands_keep_decimal_point() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        asm.emit_f32(OpCode::LdcR4, 1.0)?
            .emit_f64(OpCode::LdcR8, 2.0)?
            .emit_f64(OpCode::LdcR8, 0.25)?
            .ldc_i4(1)?;

        let text = asm.stream().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "IL_0000: ldc.r4 1.0",
                "IL_0005: ldc.r8 2.0",
                "IL_000e: ldc.r8 0.25",
                "IL_0017: ldc.i4.1",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_switch_and_regions() -> Result<()> {
        let mut asm = RecordingAssembler::new();
        let a = asm.define_named_label("case_a");
        let b = asm.define_named_label("case_b");
        asm.ldarg(0)?.emit_switch(OpCode::Switch, &[a.clone(), b.clone()])?;
        asm.mark_label(&a)?;
        let exit = asm.begin_exception_block()?;
        asm.emit_label(OpCode::LeaveS, &exit)?;
        asm.begin_finally_block()?.emit(OpCode::Endfinally)?;
        asm.end_exception_block()?;
        asm.mark_label(&b)?.ret()?;

        let plain = Disassembler::new(DisassemblyOptions {
            offsets: false,
            markers: false,
            tokens: false,
        })
        .render(asm.stream());
        assert!(plain.starts_with("ldarg.0\nswitch (IL_000e, IL_0011)\n"));

        let verbose = Disassembler::new(DisassemblyOptions::verbose()).render(asm.stream());
        assert!(verbose.contains("IL_000e: // .try {"));
        assert!(verbose.contains("IL_0010: // } finally {"));
        assert!(verbose.contains("IL_0011: // } // end .try"));
        Ok(())
    }
}
