//! The closed CIL opcode set (ECMA-335 Partition III).
//!
//! Every opcode carries its mnemonic, its encoding (an optional `0xFE` prefix followed by
//! one opcode byte) and the [`OperandKind`] it expects. The table is the single source of
//! truth for operand validation, for instruction sizing and for the bytecode sink.
//!
//! `calli` is intentionally absent: its operand is a stand-alone signature, which is not
//! one of the member handles the assembler accepts.

use std::{collections::HashMap, fmt, str::FromStr, sync::OnceLock};

use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::{assembly::instruction::OperandKind, Error, Result};

/// Prefix byte shared by all two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

macro_rules! opcodes {
    ($( $variant:ident => $mnemonic:literal, $prefix:literal, $code:literal, $kind:ident; )*) => {
        /// A CIL operation.
        ///
        /// The set is fixed at compile time. Use [`OpCode::operand_kind`] to learn which
        /// operand an opcode takes and [`OpCode::encoded_len`] for the size of its
        /// opcode bytes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
        pub enum OpCode {
            $(
                #[doc = concat!("`", $mnemonic, "`")]
                $variant,
            )*
        }

        impl OpCode {
            /// Returns the textual mnemonic, e.g. `"ldc.i4.s"`.
            #[must_use]
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( OpCode::$variant => $mnemonic, )*
                }
            }

            /// Returns the prefix byte, `0x00` for single-byte opcodes and `0xFE` otherwise.
            #[must_use]
            pub const fn prefix(self) -> u8 {
                match self {
                    $( OpCode::$variant => $prefix, )*
                }
            }

            /// Returns the opcode byte that follows the (optional) prefix.
            #[must_use]
            pub const fn code(self) -> u8 {
                match self {
                    $( OpCode::$variant => $code, )*
                }
            }

            /// Returns the operand category this opcode encodes.
            #[must_use]
            pub const fn operand_kind(self) -> OperandKind {
                match self {
                    $( OpCode::$variant => OperandKind::$kind, )*
                }
            }
        }
    };
}

opcodes! {
    // Misc
    Nop => "nop", 0x00, 0x00, None;
    Break => "break", 0x00, 0x01, None;

    // Argument / local shorthand
    Ldarg0 => "ldarg.0", 0x00, 0x02, None;
    Ldarg1 => "ldarg.1", 0x00, 0x03, None;
    Ldarg2 => "ldarg.2", 0x00, 0x04, None;
    Ldarg3 => "ldarg.3", 0x00, 0x05, None;
    Ldloc0 => "ldloc.0", 0x00, 0x06, None;
    Ldloc1 => "ldloc.1", 0x00, 0x07, None;
    Ldloc2 => "ldloc.2", 0x00, 0x08, None;
    Ldloc3 => "ldloc.3", 0x00, 0x09, None;
    Stloc0 => "stloc.0", 0x00, 0x0A, None;
    Stloc1 => "stloc.1", 0x00, 0x0B, None;
    Stloc2 => "stloc.2", 0x00, 0x0C, None;
    Stloc3 => "stloc.3", 0x00, 0x0D, None;

    // Argument / local (short form)
    LdargS => "ldarg.s", 0x00, 0x0E, UInt8;
    LdargaS => "ldarga.s", 0x00, 0x0F, UInt8;
    StargS => "starg.s", 0x00, 0x10, UInt8;
    LdlocS => "ldloc.s", 0x00, 0x11, ShortLocal;
    LdlocaS => "ldloca.s", 0x00, 0x12, ShortLocal;
    StlocS => "stloc.s", 0x00, 0x13, ShortLocal;

    // Constants
    Ldnull => "ldnull", 0x00, 0x14, None;
    LdcI4M1 => "ldc.i4.m1", 0x00, 0x15, None;
    LdcI40 => "ldc.i4.0", 0x00, 0x16, None;
    LdcI41 => "ldc.i4.1", 0x00, 0x17, None;
    LdcI42 => "ldc.i4.2", 0x00, 0x18, None;
    LdcI43 => "ldc.i4.3", 0x00, 0x19, None;
    LdcI44 => "ldc.i4.4", 0x00, 0x1A, None;
    LdcI45 => "ldc.i4.5", 0x00, 0x1B, None;
    LdcI46 => "ldc.i4.6", 0x00, 0x1C, None;
    LdcI47 => "ldc.i4.7", 0x00, 0x1D, None;
    LdcI48 => "ldc.i4.8", 0x00, 0x1E, None;
    LdcI4S => "ldc.i4.s", 0x00, 0x1F, Int8;
    LdcI4 => "ldc.i4", 0x00, 0x20, Int32;
    LdcI8 => "ldc.i8", 0x00, 0x21, Int64;
    LdcR4 => "ldc.r4", 0x00, 0x22, Float32;
    LdcR8 => "ldc.r8", 0x00, 0x23, Float64;

    // Stack
    Dup => "dup", 0x00, 0x25, None;
    Pop => "pop", 0x00, 0x26, None;

    // Calls
    Jmp => "jmp", 0x00, 0x27, Method;
    Call => "call", 0x00, 0x28, Method;
    Ret => "ret", 0x00, 0x2A, None;

    // Branches (short form)
    BrS => "br.s", 0x00, 0x2B, ShortBranch;
    BrfalseS => "brfalse.s", 0x00, 0x2C, ShortBranch;
    BrtrueS => "brtrue.s", 0x00, 0x2D, ShortBranch;
    BeqS => "beq.s", 0x00, 0x2E, ShortBranch;
    BgeS => "bge.s", 0x00, 0x2F, ShortBranch;
    BgtS => "bgt.s", 0x00, 0x30, ShortBranch;
    BleS => "ble.s", 0x00, 0x31, ShortBranch;
    BltS => "blt.s", 0x00, 0x32, ShortBranch;
    BneUnS => "bne.un.s", 0x00, 0x33, ShortBranch;
    BgeUnS => "bge.un.s", 0x00, 0x34, ShortBranch;
    BgtUnS => "bgt.un.s", 0x00, 0x35, ShortBranch;
    BleUnS => "ble.un.s", 0x00, 0x36, ShortBranch;
    BltUnS => "blt.un.s", 0x00, 0x37, ShortBranch;

    // Branches (long form)
    Br => "br", 0x00, 0x38, Branch;
    Brfalse => "brfalse", 0x00, 0x39, Branch;
    Brtrue => "brtrue", 0x00, 0x3A, Branch;
    Beq => "beq", 0x00, 0x3B, Branch;
    Bge => "bge", 0x00, 0x3C, Branch;
    Bgt => "bgt", 0x00, 0x3D, Branch;
    Ble => "ble", 0x00, 0x3E, Branch;
    Blt => "blt", 0x00, 0x3F, Branch;
    BneUn => "bne.un", 0x00, 0x40, Branch;
    BgeUn => "bge.un", 0x00, 0x41, Branch;
    BgtUn => "bgt.un", 0x00, 0x42, Branch;
    BleUn => "ble.un", 0x00, 0x43, Branch;
    BltUn => "blt.un", 0x00, 0x44, Branch;

    Switch => "switch", 0x00, 0x45, Switch;

    // Indirect load
    LdindI1 => "ldind.i1", 0x00, 0x46, None;
    LdindU1 => "ldind.u1", 0x00, 0x47, None;
    LdindI2 => "ldind.i2", 0x00, 0x48, None;
    LdindU2 => "ldind.u2", 0x00, 0x49, None;
    LdindI4 => "ldind.i4", 0x00, 0x4A, None;
    LdindU4 => "ldind.u4", 0x00, 0x4B, None;
    LdindI8 => "ldind.i8", 0x00, 0x4C, None;
    LdindI => "ldind.i", 0x00, 0x4D, None;
    LdindR4 => "ldind.r4", 0x00, 0x4E, None;
    LdindR8 => "ldind.r8", 0x00, 0x4F, None;
    LdindRef => "ldind.ref", 0x00, 0x50, None;

    // Indirect store
    StindRef => "stind.ref", 0x00, 0x51, None;
    StindI1 => "stind.i1", 0x00, 0x52, None;
    StindI2 => "stind.i2", 0x00, 0x53, None;
    StindI4 => "stind.i4", 0x00, 0x54, None;
    StindI8 => "stind.i8", 0x00, 0x55, None;
    StindR4 => "stind.r4", 0x00, 0x56, None;
    StindR8 => "stind.r8", 0x00, 0x57, None;

    // Arithmetic
    Add => "add", 0x00, 0x58, None;
    Sub => "sub", 0x00, 0x59, None;
    Mul => "mul", 0x00, 0x5A, None;
    Div => "div", 0x00, 0x5B, None;
    DivUn => "div.un", 0x00, 0x5C, None;
    Rem => "rem", 0x00, 0x5D, None;
    RemUn => "rem.un", 0x00, 0x5E, None;

    // Bitwise
    And => "and", 0x00, 0x5F, None;
    Or => "or", 0x00, 0x60, None;
    Xor => "xor", 0x00, 0x61, None;
    Shl => "shl", 0x00, 0x62, None;
    Shr => "shr", 0x00, 0x63, None;
    ShrUn => "shr.un", 0x00, 0x64, None;
    Neg => "neg", 0x00, 0x65, None;
    Not => "not", 0x00, 0x66, None;

    // Conversion
    ConvI1 => "conv.i1", 0x00, 0x67, None;
    ConvI2 => "conv.i2", 0x00, 0x68, None;
    ConvI4 => "conv.i4", 0x00, 0x69, None;
    ConvI8 => "conv.i8", 0x00, 0x6A, None;
    ConvR4 => "conv.r4", 0x00, 0x6B, None;
    ConvR8 => "conv.r8", 0x00, 0x6C, None;
    ConvU4 => "conv.u4", 0x00, 0x6D, None;
    ConvU8 => "conv.u8", 0x00, 0x6E, None;

    // Object model
    Callvirt => "callvirt", 0x00, 0x6F, Method;
    Cpobj => "cpobj", 0x00, 0x70, Type;
    Ldobj => "ldobj", 0x00, 0x71, Type;
    Ldstr => "ldstr", 0x00, 0x72, String;
    Newobj => "newobj", 0x00, 0x73, Constructor;
    Castclass => "castclass", 0x00, 0x74, Type;
    Isinst => "isinst", 0x00, 0x75, Type;
    ConvRUn => "conv.r.un", 0x00, 0x76, None;
    Unbox => "unbox", 0x00, 0x79, Type;
    Throw => "throw", 0x00, 0x7A, None;

    // Fields
    Ldfld => "ldfld", 0x00, 0x7B, Field;
    Ldflda => "ldflda", 0x00, 0x7C, Field;
    Stfld => "stfld", 0x00, 0x7D, Field;
    Ldsfld => "ldsfld", 0x00, 0x7E, Field;
    Ldsflda => "ldsflda", 0x00, 0x7F, Field;
    Stsfld => "stsfld", 0x00, 0x80, Field;
    Stobj => "stobj", 0x00, 0x81, Type;

    // Overflow conversion (unsigned source)
    ConvOvfI1Un => "conv.ovf.i1.un", 0x00, 0x82, None;
    ConvOvfI2Un => "conv.ovf.i2.un", 0x00, 0x83, None;
    ConvOvfI4Un => "conv.ovf.i4.un", 0x00, 0x84, None;
    ConvOvfI8Un => "conv.ovf.i8.un", 0x00, 0x85, None;
    ConvOvfU1Un => "conv.ovf.u1.un", 0x00, 0x86, None;
    ConvOvfU2Un => "conv.ovf.u2.un", 0x00, 0x87, None;
    ConvOvfU4Un => "conv.ovf.u4.un", 0x00, 0x88, None;
    ConvOvfU8Un => "conv.ovf.u8.un", 0x00, 0x89, None;
    ConvOvfIUn => "conv.ovf.i.un", 0x00, 0x8A, None;
    ConvOvfUUn => "conv.ovf.u.un", 0x00, 0x8B, None;

    // Boxing / arrays
    Box => "box", 0x00, 0x8C, Type;
    Newarr => "newarr", 0x00, 0x8D, Type;
    Ldlen => "ldlen", 0x00, 0x8E, None;
    Ldelema => "ldelema", 0x00, 0x8F, Type;
    LdelemI1 => "ldelem.i1", 0x00, 0x90, None;
    LdelemU1 => "ldelem.u1", 0x00, 0x91, None;
    LdelemI2 => "ldelem.i2", 0x00, 0x92, None;
    LdelemU2 => "ldelem.u2", 0x00, 0x93, None;
    LdelemI4 => "ldelem.i4", 0x00, 0x94, None;
    LdelemU4 => "ldelem.u4", 0x00, 0x95, None;
    LdelemI8 => "ldelem.i8", 0x00, 0x96, None;
    LdelemI => "ldelem.i", 0x00, 0x97, None;
    LdelemR4 => "ldelem.r4", 0x00, 0x98, None;
    LdelemR8 => "ldelem.r8", 0x00, 0x99, None;
    LdelemRef => "ldelem.ref", 0x00, 0x9A, None;
    StelemI => "stelem.i", 0x00, 0x9B, None;
    StelemI1 => "stelem.i1", 0x00, 0x9C, None;
    StelemI2 => "stelem.i2", 0x00, 0x9D, None;
    StelemI4 => "stelem.i4", 0x00, 0x9E, None;
    StelemI8 => "stelem.i8", 0x00, 0x9F, None;
    StelemR4 => "stelem.r4", 0x00, 0xA0, None;
    StelemR8 => "stelem.r8", 0x00, 0xA1, None;
    StelemRef => "stelem.ref", 0x00, 0xA2, None;
    Ldelem => "ldelem", 0x00, 0xA3, Type;
    Stelem => "stelem", 0x00, 0xA4, Type;
    UnboxAny => "unbox.any", 0x00, 0xA5, Type;

    // Overflow conversion (signed source)
    ConvOvfI1 => "conv.ovf.i1", 0x00, 0xB3, None;
    ConvOvfU1 => "conv.ovf.u1", 0x00, 0xB4, None;
    ConvOvfI2 => "conv.ovf.i2", 0x00, 0xB5, None;
    ConvOvfU2 => "conv.ovf.u2", 0x00, 0xB6, None;
    ConvOvfI4 => "conv.ovf.i4", 0x00, 0xB7, None;
    ConvOvfU4 => "conv.ovf.u4", 0x00, 0xB8, None;
    ConvOvfI8 => "conv.ovf.i8", 0x00, 0xB9, None;
    ConvOvfU8 => "conv.ovf.u8", 0x00, 0xBA, None;

    // Typed references
    Refanyval => "refanyval", 0x00, 0xC2, Type;
    Ckfinite => "ckfinite", 0x00, 0xC3, None;
    Mkrefany => "mkrefany", 0x00, 0xC6, Type;

    // Tokens / conversion
    Ldtoken => "ldtoken", 0x00, 0xD0, Token;
    ConvU2 => "conv.u2", 0x00, 0xD1, None;
    ConvU1 => "conv.u1", 0x00, 0xD2, None;
    ConvI => "conv.i", 0x00, 0xD3, None;
    ConvOvfI => "conv.ovf.i", 0x00, 0xD4, None;
    ConvOvfU => "conv.ovf.u", 0x00, 0xD5, None;

    // Overflow arithmetic
    AddOvf => "add.ovf", 0x00, 0xD6, None;
    AddOvfUn => "add.ovf.un", 0x00, 0xD7, None;
    MulOvf => "mul.ovf", 0x00, 0xD8, None;
    MulOvfUn => "mul.ovf.un", 0x00, 0xD9, None;
    SubOvf => "sub.ovf", 0x00, 0xDA, None;
    SubOvfUn => "sub.ovf.un", 0x00, 0xDB, None;

    // Exception handling
    Endfinally => "endfinally", 0x00, 0xDC, None;
    Leave => "leave", 0x00, 0xDD, Branch;
    LeaveS => "leave.s", 0x00, 0xDE, ShortBranch;

    StindI => "stind.i", 0x00, 0xDF, None;
    ConvU => "conv.u", 0x00, 0xE0, None;

    // Two-byte opcodes
    Arglist => "arglist", 0xFE, 0x00, None;
    Ceq => "ceq", 0xFE, 0x01, None;
    Cgt => "cgt", 0xFE, 0x02, None;
    CgtUn => "cgt.un", 0xFE, 0x03, None;
    Clt => "clt", 0xFE, 0x04, None;
    CltUn => "clt.un", 0xFE, 0x05, None;
    Ldftn => "ldftn", 0xFE, 0x06, Method;
    Ldvirtftn => "ldvirtftn", 0xFE, 0x07, Method;
    Ldarg => "ldarg", 0xFE, 0x09, UInt16;
    Ldarga => "ldarga", 0xFE, 0x0A, UInt16;
    Starg => "starg", 0xFE, 0x0B, UInt16;
    Ldloc => "ldloc", 0xFE, 0x0C, Local;
    Ldloca => "ldloca", 0xFE, 0x0D, Local;
    Stloc => "stloc", 0xFE, 0x0E, Local;
    Localloc => "localloc", 0xFE, 0x0F, None;
    Endfilter => "endfilter", 0xFE, 0x11, None;
    Unaligned => "unaligned.", 0xFE, 0x12, UInt8;
    Volatile => "volatile.", 0xFE, 0x13, None;
    Tail => "tail.", 0xFE, 0x14, None;
    Initobj => "initobj", 0xFE, 0x15, Type;
    Constrained => "constrained.", 0xFE, 0x16, Type;
    Cpblk => "cpblk", 0xFE, 0x17, None;
    Initblk => "initblk", 0xFE, 0x18, None;
    Rethrow => "rethrow", 0xFE, 0x1A, None;
    Sizeof => "sizeof", 0xFE, 0x1C, Type;
    Refanytype => "refanytype", 0xFE, 0x1D, None;
    Readonly => "readonly.", 0xFE, 0x1E, None;
}

/// Reverse lookup table mapping mnemonics to opcodes.
static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();

fn get_mnemonic_lookup() -> &'static HashMap<&'static str, OpCode> {
    MNEMONIC_TO_OPCODE.get_or_init(|| OpCode::iter().map(|op| (op.mnemonic(), op)).collect())
}

impl OpCode {
    /// Number of opcodes in the set.
    pub const TOTAL: usize = <OpCode as EnumCount>::COUNT;

    /// Returns the number of bytes the opcode itself occupies (1, or 2 with the `0xFE` prefix).
    #[must_use]
    pub const fn encoded_len(self) -> u32 {
        if self.prefix() == 0 {
            1
        } else {
            2
        }
    }

    /// Appends the opcode bytes (prefix included) to `buffer`.
    pub fn encode_into(self, buffer: &mut Vec<u8>) {
        if self.prefix() != 0 {
            buffer.push(self.prefix());
        }
        buffer.push(self.code());
    }

    /// Returns true for branch opcodes that take a single label (including `leave`).
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self.operand_kind(),
            OperandKind::ShortBranch | OperandKind::Branch
        )
    }

    /// Returns true for `ret`, `throw`, `rethrow`, `endfinally`, `endfilter` and `jmp`.
    #[must_use]
    pub const fn terminates(self) -> bool {
        matches!(
            self,
            OpCode::Ret
                | OpCode::Throw
                | OpCode::Rethrow
                | OpCode::Endfinally
                | OpCode::Endfilter
                | OpCode::Jmp
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for OpCode {
    type Err = Error;

    fn from_str(mnemonic: &str) -> Result<Self> {
        get_mnemonic_lookup()
            .get(mnemonic)
            .copied()
            .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
    }
}
