#![no_main]

use cilemit::prelude::*;
use libfuzzer_sys::fuzz_target;
use strum::IntoEnumIterator;

fn object_type() -> TypeHandle {
    TypeHandle::new(Token::new(0x0100_0001), "System.Object")
}

fn operand(kind: OperandKind, arg: u8, labels: &[Label], locals: &[Local]) -> Option<Operand> {
    let label = |i: u8| labels.get(usize::from(i) % labels.len().max(1)).cloned();
    Some(match kind {
        OperandKind::None => Operand::None,
        OperandKind::Int8 => Operand::Int8(arg as i8),
        OperandKind::UInt8 => Operand::UInt8(arg),
        OperandKind::UInt16 => Operand::UInt16(u16::from(arg) << 4),
        OperandKind::Int32 => Operand::Int32(i32::from(arg) << 20),
        OperandKind::Int64 => Operand::Int64(i64::from(arg) << 40),
        OperandKind::Float32 => Operand::Float32(f32::from(arg)),
        OperandKind::Float64 => Operand::Float64(f64::from(arg)),
        OperandKind::String => Operand::String(format!("s{arg}")),
        OperandKind::ShortBranch | OperandKind::Branch => Operand::Label(label(arg)?),
        OperandKind::Switch => Operand::Labels(
            (0..arg % 8)
                .filter_map(|i| label(arg.wrapping_add(i)))
                .collect(),
        ),
        OperandKind::ShortLocal | OperandKind::Local => {
            Operand::Local(locals.get(usize::from(arg) % locals.len().max(1))?.clone())
        }
        OperandKind::Field => Operand::Field(FieldHandle::new(Token::new(0x0400_0001), "f")),
        OperandKind::Method => Operand::Method(MethodHandle::new(Token::new(0x0600_0001), "m")),
        OperandKind::Constructor => {
            Operand::Constructor(ConstructorHandle::new(Token::new(0x0A00_0001), "c"))
        }
        OperandKind::Type | OperandKind::Token => Operand::Type(object_type()),
    })
}

fuzz_target!(|data: &[u8]| {
    let opcodes: Vec<OpCode> = OpCode::iter().collect();
    let mut asm = BackedAssembler::new(BytecodeSink::new());
    let mut labels: Vec<Label> = Vec::new();
    let mut locals: Vec<Local> = Vec::new();
    let exception = object_type();

    for chunk in data.chunks_exact(3) {
        let (action, selector, arg) = (chunk[0], chunk[1], chunk[2]);
        let before = asm.stream().end_offset();

        let ok = match action % 12 {
            0..=3 => {
                let opcode = opcodes[usize::from(selector) % opcodes.len()];
                match operand(opcode.operand_kind(), arg, &labels, &locals) {
                    Some(operand) => asm.emit_operand(opcode, operand).is_ok(),
                    None => false,
                }
            }
            4 => asm.define_label().map(|l| labels.push(l)).is_ok(),
            5 => match labels.get(usize::from(selector) % labels.len().max(1)) {
                Some(label) => {
                    let label = label.clone();
                    asm.mark_label(&label).is_ok()
                }
                None => false,
            },
            6 => asm
                .declare_local(object_type(), arg & 1 == 1)
                .map(|l| locals.push(l))
                .is_ok(),
            7 => asm.begin_exception_block().map(|l| labels.push(l)).is_ok(),
            8 => asm
                .begin_catch_block((selector & 1 == 0).then_some(&exception))
                .is_ok(),
            9 => match selector % 3 {
                0 => asm.begin_finally_block().is_ok(),
                1 => asm.begin_fault_block().is_ok(),
                _ => asm.begin_except_filter_block().is_ok(),
            },
            10 => asm.end_exception_block().is_ok(),
            _ => match selector & 1 {
                0 => asm.begin_scope().is_ok(),
                _ => asm.end_scope().is_ok(),
            },
        };

        if !ok {
            // a rejected call must not move the layout
            assert_eq!(asm.stream().end_offset(), before);
        }
    }

    let Ok((stream, sink)) = asm.finish() else {
        return;
    };
    if let Ok(body) = sink.finish() {
        assert_eq!(body.code.len() as u64, u64::from(stream.end_offset()));
    }
});
