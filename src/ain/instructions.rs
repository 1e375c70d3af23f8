//! The bytecode instruction table.
//!
//! Every opcode fixes its printable mnemonic, immediate argument kinds,
//! stack operand lists and advance behaviour. A handful of instructions
//! changed arity when the `ain` format reached version 11; those entries
//! are patched into a per-image copy of the table rather than a global
//! (see [`InstructionTable::new`]).

use num_enum::TryFromPrimitive;

use super::DataType;

/// Total opcode slots; ids run contiguously from 0.
pub const NR_OPCODES: usize = 0x111;

/// Debuggers may set the high bit of an opcode word to mark a breakpoint;
/// it is masked off before table lookup.
pub const BREAKPOINT_BIT: u16 = 0x8000;

/// Immediate-argument and stack-operand kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Float,
    Address,
    Func,
    String,
    Msg,
    Local,
    Global,
    Struct,
    Syscall,
    Library,
    LibraryFunc,
    File,
    Delegate,
    Switch,
    Member,
    Member2,
    Member3,
    LocalMember,
    Page,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum Opcode {
    Push = 0x00,
    Pop,
    Ref,
    RefRef,
    PushGlobalPage,
    PushLocalPage,
    Inv,
    Not,
    Compl,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    LShift,
    RShift,
    Lt,
    Gt,
    Lte,
    Gte,
    NotE,
    EqualE,
    Assign,
    PlusA,
    MinusA,
    MulA,
    DivA,
    ModA,
    AndA,
    OrA,
    XorA,
    LShiftA,
    RShiftA,
    FAssign,
    FPlusA,
    FMinusA,
    FMulA,
    FDivA,
    Dup2,
    DupX2,
    Cmp,
    Jump,
    Ifz,
    Ifnz,
    Return,
    CallFunc,
    Inc,
    Dec,
    Ftoi,
    Itof,
    FInv,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FLt,
    FGt,
    FLte,
    FGte,
    FNotE,
    FEqualE,
    FPush,
    SPush,
    SPop,
    SAdd,
    SAssign,
    SPlusA,
    SRef,
    SRefRef,
    SNotE,
    SEqualE,
    SfCreate,
    SfCreatePixel,
    SfCreateAlpha,
    SrPop,
    SrAssign,
    SrRef,
    SrRefRef,
    AAlloc,
    ARealloc,
    AFree,
    ANumof,
    ACopy,
    AFill,
    CRef,
    CAssign,
    Msg,
    CallHll,
    PushStructPage,
    CallMethod,
    ShGlobalRef,
    ShLocalRef,
    Switch,
    StrSwitch,
    Func,
    Eof,
    CallSys,
    SJump,
    CallOnJump,
    Swap,
    ShStructRef,
    SLength,
    SLengthByte,
    IString,
    CallFunc2,
    Dup2X1,
    RAssign,
    FtAssignS,
    Assert,
    SLt,
    SGt,
    SLte,
    SGte,
    SLength2,
    SLengthByte2,
    New,
    Delete,
    CheckUdo,
    ARef,
    Dup,
    DupU2,
    SpInc,
    SpDec,
    EndFunc,
    REqualE,
    RNotE,
    ShLocalCreate,
    ShLocalDelete,
    Stoi,
    APushBack,
    APopBack,
    SEmpty,
    AEmpty,
    AErase,
    AInsert,
    ShLocalInc,
    ShLocalDec,
    ShLocalAssign,
    Itob,
    SFind,
    SGetPart,
    ASort,
    SPushBack,
    SPopBack,
    Ftos,
    SMod,
    SPlusA2,
    ObjSwap,
    SErase,
    SrRef2,
    SErase2,
    SPushBack2,
    SPopBack2,
    Itoli,
    LiAdd,
    LiSub,
    LiMul,
    LiDiv,
    LiMod,
    LiAssign,
    LiPlusA,
    LiMinusA,
    LiMulA,
    LiDivA,
    LiModA,
    LiAndA,
    LiOrA,
    LiXorA,
    LiLShiftA,
    LiRShiftA,
    LiInc,
    LiDec,
    AFind,
    AReverse,
    ShSrAssign,
    ShMemAssignLocal,
    ANumofGlob1,
    ANumofStruct1,
    ShMemAssignImm,
    ShLocalRefRef,
    ShLocalAssignSubImm,
    ShIfLocLtImm,
    ShIfLocGeImm,
    ShLocRefAssignMem,
    PageRef,
    ShGlobalAssignLocal,
    ShStructRefGtImm,
    ShStructAssignLocalRefItob,
    ShLocalAssignStructRef,
    ShIfStructRefNeLocalRef,
    ShIfStructRefGtImm,
    ShStructRefCallMethodNoParam,
    ShStructRef2,
    ShRefStructRef2,
    ShStructRef3,
    ShStructRef2CallMethodNoParam,
    ShIfStructRefZ,
    ShIfStructANotEmpty,
    ShIfLocGtImm,
    ShIfStructRefNeImm,
    ThisCallMethodNoParam,
    ShIfLocNeImm,
    ShIfStructRefEqImm,
    ShGlobalAssignImm,
    ShLocalStructAssignImm,
    ShStructAPushBackLocalStruct,
    ShGlobalAPushBackLocalStruct,
    ShLocalAPushBackLocalStruct,
    ShIfSrefNeStr0,
    ShSAssignRef,
    ShAFindSref,
    ShSrefEmpty,
    ShStructSrefEqLocalSref,
    ShLocalSrefEqStr0,
    ShStructSrefNeLocalSref,
    ShLocalSrefNeStr0,
    ShStructSrRef,
    ShStructSRef,
    SRef2,
    ShRefLocalAssignStructRef2,
    ShGlobalSRef,
    ShLocalSRef,
    ShLocalRefSAssignLocalSref,
    ShLocalAPushBackLocalSref,
    ShSAssignCallSys19,
    ShSAssignStr0,
    ShSAssignLocalSref,
    ShStructRefSAssignLocalSref,
    ShLocalSrefEmpty,
    ShGlobalAPushBackLocalSref,
    ShStructAPushBackLocalSref,
    ShStructSrefEmpty,
    ShGlobalSrefEmpty,
    ShSAssignStructSref,
    ShSAssignGlobalSref,
    ShStructSrefNeStr0,
    ShGlobalSrefNeStr0,
    ShLocLtImmOrLocGeImm,
    ASortMem,
    DgSet,
    DgAdd,
    DgCall,
    DgNumof,
    DgExist,
    DgErase,
    DgClear,
    DgCopy,
    DgAssign,
    DgPlusA,
    DgPop,
    DgNewFromMethod,
    DgMinusA,
    DgCallBegin,
    DgNew,
    DgStrToMethod,
    Op0x102 = 0x102,
    XGetEnv,
    XSet,
    XIcast,
    XOpSet,
    Op0x107,
    Op0x108,
    Op0x109,
    XDup,
    XMov,
    XRef,
    XAssign,
    XAInit,
    XASize,
    XToStr,
}

/// One instruction-table entry.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub name: &'static str,
    /// Whether this opcode has ever been observed/decoded.
    pub implemented: bool,
    /// Jump-like instructions manage their own instruction-pointer
    /// advance at runtime (`ip_inc() == 0`).
    pub jumps: bool,
    pub nr_args: usize,
    /// Immediate argument kinds; only the first `nr_args` are meaningful.
    pub args: [ArgType; 3],
    pub stack_args: &'static [ArgType],
    pub stack_out: &'static [ArgType],
}

impl Instruction {
    /// Encoded width in the code section: opcode word plus 32-bit
    /// immediates.
    #[must_use]
    pub fn width(&self) -> usize {
        2 + self.nr_args * 4
    }

    /// Amount the interpreter advances the instruction pointer; 0 for
    /// jump-like instructions whose advance is operand dependent.
    #[must_use]
    pub fn ip_inc(&self) -> usize {
        if self.jumps { 0 } else { self.width() }
    }
}

macro_rules! argarr {
    () => {
        [ArgType::Int; 3]
    };
    ($a:ident) => {
        [ArgType::$a, ArgType::Int, ArgType::Int]
    };
    ($a:ident $b:ident) => {
        [ArgType::$a, ArgType::$b, ArgType::Int]
    };
    ($a:ident $b:ident $c:ident) => {
        [ArgType::$a, ArgType::$b, ArgType::$c]
    };
}

macro_rules! instr {
    ($kind:ident $op:ident $name:literal, $nargs:literal, [$($a:ident)*], [$($sin:ident)*], [$($sout:ident)*]) => {
        Instruction {
            opcode: Opcode::$op,
            name: $name,
            implemented: instr!(@implemented $kind),
            jumps: instr!(@jumps $kind),
            nr_args: $nargs,
            args: argarr!($($a)*),
            stack_args: &[$(ArgType::$sin),*],
            stack_out: &[$(ArgType::$sout),*],
        }
    };
    (@implemented TODO) => { false };
    (@implemented $k:ident) => { true };
    (@jumps JMP) => { true };
    (@jumps $k:ident) => { false };
}

/// The base table (pre-v11 arities for the version-sensitive entries).
static INSTRUCTIONS: [Instruction; NR_OPCODES] = [
    instr!(OP   Push "PUSH", 1, [Int], [], [Int]),
    instr!(OP   Pop "POP", 0, [], [Int], []),
    instr!(OP   Ref "REF", 0, [], [Page Var], [Int]),
    instr!(OP   RefRef "REFREF", 0, [], [Page Var], [Page Var]),
    instr!(OP   PushGlobalPage "PUSHGLOBALPAGE", 0, [], [], [Page]),
    instr!(OP   PushLocalPage "PUSHLOCALPAGE", 0, [], [], [Page]),
    instr!(OP   Inv "INV", 0, [], [Int], [Int]),
    instr!(OP   Not "NOT", 0, [], [Int], [Int]),
    instr!(OP   Compl "COMPL", 0, [], [Int], [Int]),
    instr!(OP   Add "ADD", 0, [], [Int Int], [Int]),
    instr!(OP   Sub "SUB", 0, [], [Int Int], [Int]),
    instr!(OP   Mul "MUL", 0, [], [Int Int], [Int]),
    instr!(OP   Div "DIV", 0, [], [Int Int], [Int]),
    instr!(OP   Mod "MOD", 0, [], [Int Int], [Int]),
    instr!(OP   And "AND", 0, [], [Int Int], [Int]),
    instr!(OP   Or "OR", 0, [], [Int Int], [Int]),
    instr!(OP   Xor "XOR", 0, [], [Int Int], [Int]),
    instr!(OP   LShift "LSHIFT", 0, [], [Int Int], [Int]),
    instr!(OP   RShift "RSHIFT", 0, [], [Int Int], [Int]),
    instr!(OP   Lt "LT", 0, [], [Int Int], [Int]),
    instr!(OP   Gt "GT", 0, [], [Int Int], [Int]),
    instr!(OP   Lte "LTE", 0, [], [Int Int], [Int]),
    instr!(OP   Gte "GTE", 0, [], [Int Int], [Int]),
    instr!(OP   NotE "NOTE", 0, [], [Int Int], [Int]),
    instr!(OP   EqualE "EQUALE", 0, [], [Int Int], [Int]),
    instr!(OP   Assign "ASSIGN", 0, [], [Page Var Int], [Int]),
    instr!(OP   PlusA "PLUSA", 0, [], [Page Var Int], [Int]),
    instr!(OP   MinusA "MINUSA", 0, [], [Page Var Int], [Int]),
    instr!(OP   MulA "MULA", 0, [], [Page Var Int], [Int]),
    instr!(OP   DivA "DIVA", 0, [], [Page Var Int], [Int]),
    instr!(OP   ModA "MODA", 0, [], [Page Var Int], [Int]),
    instr!(OP   AndA "ANDA", 0, [], [Page Var Int], [Int]),
    instr!(OP   OrA "ORA", 0, [], [Page Var Int], [Int]),
    instr!(OP   XorA "XORA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LShiftA "LSHIFTA", 0, [], [Page Var Int], [Int]),
    instr!(OP   RShiftA "RSHIFTA", 0, [], [Page Var Int], [Int]),
    instr!(OP   FAssign "F_ASSIGN", 0, [], [Page Var Float], [Float]),
    instr!(OP   FPlusA "F_PLUSA", 0, [], [Page Var Float], [Float]),
    instr!(OP   FMinusA "F_MINUSA", 0, [], [Page Var Float], [Float]),
    instr!(OP   FMulA "F_MULA", 0, [], [Page Var Float], [Float]),
    instr!(OP   FDivA "F_DIVA", 0, [], [Page Var Float], [Float]),
    instr!(OP   Dup2 "DUP2", 0, [], [Int Int], [Int Int Int Int]),
    instr!(OP   DupX2 "DUP_X2", 0, [], [Int Int Int], [Int Int Int Int]),
    instr!(TODO Cmp "CMP", 0, [], [], []),
    instr!(JMP  Jump "JUMP", 1, [Address], [], []),
    instr!(JMP  Ifz "IFZ", 1, [Address], [Int], []),
    instr!(JMP  Ifnz "IFNZ", 1, [Address], [Int], []),
    instr!(JMP  Return "RETURN", 0, [], [], []),
    instr!(JMP  CallFunc "CALLFUNC", 1, [Func], [], []),
    instr!(OP   Inc "INC", 0, [], [Page Var], []),
    instr!(OP   Dec "DEC", 0, [], [Page Var], []),
    instr!(OP   Ftoi "FTOI", 0, [], [Float], [Int]),
    instr!(OP   Itof "ITOF", 0, [], [Int], [Float]),
    instr!(OP   FInv "F_INV", 0, [], [Float], [Float]),
    instr!(OP   FAdd "F_ADD", 0, [], [Float Float], [Float]),
    instr!(OP   FSub "F_SUB", 0, [], [Float Float], [Float]),
    instr!(OP   FMul "F_MUL", 0, [], [Float Float], [Float]),
    instr!(OP   FDiv "F_DIV", 0, [], [Float Float], [Float]),
    instr!(OP   FLt "F_LT", 0, [], [Float Float], [Int]),
    instr!(OP   FGt "F_GT", 0, [], [Float Float], [Int]),
    instr!(OP   FLte "F_LTE", 0, [], [Float Float], [Int]),
    instr!(OP   FGte "F_GTE", 0, [], [Float Float], [Int]),
    instr!(OP   FNotE "F_NOTE", 0, [], [Float Float], [Int]),
    instr!(OP   FEqualE "F_EQUALE", 0, [], [Float Float], [Int]),
    instr!(OP   FPush "F_PUSH", 1, [Float], [], [Float]),
    instr!(OP   SPush "S_PUSH", 1, [String], [], [String]),
    instr!(OP   SPop "S_POP", 0, [], [String], []),
    instr!(OP   SAdd "S_ADD", 0, [], [String String], [String]),
    instr!(OP   SAssign "S_ASSIGN", 0, [], [String String], [String]),
    instr!(OP   SPlusA "S_PLUSA", 0, [], [String String], [String]),
    instr!(OP   SRef "S_REF", 0, [], [Page Var], [String]),
    instr!(TODO SRefRef "S_REFREF", 0, [], [], []),
    instr!(OP   SNotE "S_NOTE", 0, [], [String String], [Int]),
    instr!(OP   SEqualE "S_EQUALE", 0, [], [String String], [Int]),
    instr!(TODO SfCreate "SF_CREATE", 0, [], [], []),
    instr!(TODO SfCreatePixel "SF_CREATEPIXEL", 0, [], [], []),
    instr!(TODO SfCreateAlpha "SF_CREATEALPHA", 0, [], [], []),
    instr!(OP   SrPop "SR_POP", 0, [], [Page], []),
    instr!(OP   SrAssign "SR_ASSIGN", 0, [], [Page Page Struct], [Page]),
    instr!(OP   SrRef "SR_REF", 1, [Struct], [Page Var], [Page]),
    instr!(TODO SrRefRef "SR_REFREF", 0, [], [], []),
    instr!(OP   AAlloc "A_ALLOC", 0, [], [], []),
    instr!(OP   ARealloc "A_REALLOC", 0, [], [], []),
    instr!(OP   AFree "A_FREE", 0, [], [Page Var], []),
    instr!(OP   ANumof "A_NUMOF", 0, [], [Page Var Int], []),
    instr!(OP   ACopy "A_COPY", 0, [], [Page Var Int Page Int Int], []),
    instr!(OP   AFill "A_FILL", 0, [], [Page Var Int Int Int], []),
    instr!(OP   CRef "C_REF", 0, [], [String Int], [Int]),
    instr!(OP   CAssign "C_ASSIGN", 0, [], [String Int Int], [Int]),
    instr!(JMP  Msg "MSG", 1, [Msg], [], []),
    instr!(OP   CallHll "CALLHLL", 2, [Library LibraryFunc Int], [], []),
    instr!(OP   PushStructPage "PUSHSTRUCTPAGE", 0, [], [], [Page]),
    instr!(JMP  CallMethod "CALLMETHOD", 1, [Func], [], []),
    instr!(OP   ShGlobalRef "SH_GLOBALREF", 1, [Global], [], [Int]),
    instr!(OP   ShLocalRef "SH_LOCALREF", 1, [Local], [], [Int]),
    instr!(JMP  Switch "SWITCH", 1, [Switch], [Int], []),
    instr!(JMP  StrSwitch "STRSWITCH", 1, [Switch], [String], []),
    instr!(OP   Func "FUNC", 1, [Func], [], []),
    instr!(OP   Eof "EOF", 1, [File], [], []),
    instr!(OP   CallSys "CALLSYS", 1, [Syscall], [], []),
    instr!(JMP  SJump "SJUMP", 0, [], [Int], []),
    instr!(OP   CallOnJump "CALLONJUMP", 0, [], [String], [Page]),
    instr!(OP   Swap "SWAP", 0, [], [Int Int], [Int Int]),
    instr!(OP   ShStructRef "SH_STRUCTREF", 1, [Member], [], [Int]),
    instr!(OP   SLength "S_LENGTH", 0, [], [Page Var], [Int]),
    instr!(OP   SLengthByte "S_LENGTHBYTE", 0, [], [Page Var], [Int]),
    instr!(OP   IString "I_STRING", 0, [], [Int], [String]),
    instr!(JMP  CallFunc2 "CALLFUNC2", 0, [], [], []),
    instr!(OP   Dup2X1 "DUP2_X1", 0, [], [Int Int Int], [Int Int Int Int Int]),
    instr!(OP   RAssign "R_ASSIGN", 0, [], [Page Var Page Var], [Page Var]),
    instr!(OP   FtAssignS "FT_ASSIGNS", 0, [], [Page Var String Int], [String]),
    instr!(OP   Assert "ASSERT", 0, [], [Int String String Int], []),
    instr!(OP   SLt "S_LT", 0, [], [String String], [Int]),
    instr!(OP   SGt "S_GT", 0, [], [String String], [Int]),
    instr!(OP   SLte "S_LTE", 0, [], [String String], [Int]),
    instr!(OP   SGte "S_GTE", 0, [], [String String], [Int]),
    instr!(OP   SLength2 "S_LENGTH2", 0, [], [String], [Int]),
    instr!(TODO SLengthByte2 "S_LENGTHBYTE2", 0, [], [], []),
    instr!(OP   New "NEW", 0, [Struct Int], [], []),
    instr!(OP   Delete "DELETE", 0, [], [Page], []),
    instr!(TODO CheckUdo "CHECKUDO", 0, [], [], []),
    instr!(OP   ARef "A_REF", 0, [], [Page], []),
    instr!(OP   Dup "DUP", 0, [], [Int], [Int Int]),
    instr!(OP   DupU2 "DUP_U2", 0, [], [Int Int], [Int Int Int]),
    instr!(OP   SpInc "SP_INC", 0, [], [Page], []),
    instr!(TODO SpDec "SP_DEC", 0, [], [Page], []),
    instr!(OP   EndFunc "ENDFUNC", 1, [Func], [], []),
    instr!(OP   REqualE "R_EQUALE", 0, [], [Page Var Page Var], [Int]),
    instr!(OP   RNotE "R_NOTE", 0, [], [Page Var Page Var], [Int]),
    instr!(OP   ShLocalCreate "SH_LOCALCREATE", 2, [Local Struct], [], []),
    instr!(OP   ShLocalDelete "SH_LOCALDELETE", 1, [Local], [], []),
    instr!(OP   Stoi "STOI", 0, [], [String], [Int]),
    instr!(OP   APushBack "A_PUSHBACK", 0, [], [Page Var Int], []),
    instr!(OP   APopBack "A_POPBACK", 0, [], [Page Var], []),
    instr!(OP   SEmpty "S_EMPTY", 0, [], [String], [Int]),
    instr!(OP   AEmpty "A_EMPTY", 0, [], [Page Var], [Int]),
    instr!(OP   AErase "A_ERASE", 0, [], [Page Var Int], [Int]),
    instr!(OP   AInsert "A_INSERT", 0, [], [Page Var Int Int], []),
    instr!(OP   ShLocalInc "SH_LOCALINC", 1, [Local], [], []),
    instr!(OP   ShLocalDec "SH_LOCALDEC", 1, [Local], [], []),
    instr!(OP   ShLocalAssign "SH_LOCALASSIGN", 2, [Local Int], [], []),
    instr!(OP   Itob "ITOB", 0, [], [Int], [Int]),
    instr!(OP   SFind "S_FIND", 0, [], [String String], [Int]),
    instr!(OP   SGetPart "S_GETPART", 0, [], [String Int Int], [String]),
    instr!(OP   ASort "A_SORT", 0, [], [Page Var Func], []),
    instr!(TODO SPushBack "S_PUSHBACK", 0, [], [], []),
    instr!(TODO SPopBack "S_POPBACK", 0, [], [], []),
    instr!(OP   Ftos "FTOS", 0, [], [Float], [String]),
    instr!(OP   SMod "S_MOD", 0, [Int], [String Int Int], [String]),
    instr!(OP   SPlusA2 "S_PLUSA2", 0, [], [String String], [String]),
    instr!(OP   ObjSwap "OBJSWAP", 0, [Int], [Page Var Page Var Int], []),
    instr!(TODO SErase "S_ERASE", 0, [], [], []),
    instr!(OP   SrRef2 "SR_REF2", 1, [Struct], [Page], [Page]),
    instr!(OP   SErase2 "S_ERASE2", 0, [], [String Int Int], []),
    instr!(OP   SPushBack2 "S_PUSHBACK2", 0, [], [String Int], []),
    instr!(OP   SPopBack2 "S_POPBACK2", 0, [], [String], []),
    instr!(OP   Itoli "ITOLI", 0, [], [Int], [Int]),
    instr!(OP   LiAdd "LI_ADD", 0, [], [Int Int], [Int]),
    instr!(OP   LiSub "LI_SUB", 0, [], [Int Int], [Int]),
    instr!(OP   LiMul "LI_MUL", 0, [], [Int Int], [Int]),
    instr!(OP   LiDiv "LI_DIV", 0, [], [Int Int], [Int]),
    instr!(OP   LiMod "LI_MOD", 0, [], [Int Int], [Int]),
    instr!(OP   LiAssign "LI_ASSIGN", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiPlusA "LI_PLUSA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiMinusA "LI_MINUSA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiMulA "LI_MULA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiDivA "LI_DIVA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiModA "LI_MODA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiAndA "LI_ANDA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiOrA "LI_ORA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiXorA "LI_XORA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiLShiftA "LI_LSHIFTA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiRShiftA "LI_RSHIFTA", 0, [], [Page Var Int], [Int]),
    instr!(OP   LiInc "LI_INC", 0, [], [Page Var], []),
    instr!(OP   LiDec "LI_DEC", 0, [], [Page Var], []),
    instr!(OP   AFind "A_FIND", 0, [], [Page Var Int Int Int Func], [Int]),
    instr!(OP   AReverse "A_REVERSE", 0, [], [Page Var], []),
    instr!(OP   ShSrAssign "SH_SR_ASSIGN", 0, [], [Page Page Var], []),
    instr!(OP   ShMemAssignLocal "SH_MEM_ASSIGN_LOCAL", 2, [Member Local], [], []),
    instr!(OP   ANumofGlob1 "A_NUMOF_GLOB_1", 1, [Global], [], [Int]),
    instr!(OP   ANumofStruct1 "A_NUMOF_STRUCT_1", 1, [Member], [], [Int]),
    instr!(OP   ShMemAssignImm "SH_MEM_ASSIGN_IMM", 2, [Member Int], [], []),
    instr!(OP   ShLocalRefRef "SH_LOCALREFREF", 1, [Local], [], [Page Int]),
    instr!(OP   ShLocalAssignSubImm "SH_LOCALASSIGN_SUB_IMM", 2, [Local Int], [], []),
    instr!(JMP  ShIfLocLtImm "SH_IF_LOC_LT_IMM", 3, [Local Int Address], [], []),
    instr!(JMP  ShIfLocGeImm "SH_IF_LOC_GE_IMM", 3, [Local Int Address], [], []),
    instr!(OP   ShLocRefAssignMem "SH_LOCREF_ASSIGN_MEM", 2, [Local Member], [], []),
    instr!(OP   PageRef "PAGE_REF", 1, [Int], [Page], [Int]),
    instr!(OP   ShGlobalAssignLocal "SH_GLOBAL_ASSIGN_LOCAL", 2, [Global Local], [], []),
    instr!(OP   ShStructRefGtImm "SH_STRUCTREF_GT_IMM", 2, [Member Int], [], []),
    instr!(OP   ShStructAssignLocalRefItob "SH_STRUCT_ASSIGN_LOCALREF_ITOB", 2, [Member Local], [], []),
    instr!(OP   ShLocalAssignStructRef "SH_LOCAL_ASSIGN_STRUCTREF", 2, [Local Member], [], []),
    instr!(JMP  ShIfStructRefNeLocalRef "SH_IF_STRUCTREF_NE_LOCALREF", 3, [Member Local Address], [], []),
    instr!(JMP  ShIfStructRefGtImm "SH_IF_STRUCTREF_GT_IMM", 3, [Member Int Address], [], []),
    instr!(JMP  ShStructRefCallMethodNoParam "SH_STRUCTREF_CALLMETHOD_NO_PARAM", 2, [Member Func], [], []),
    instr!(OP   ShStructRef2 "SH_STRUCTREF2", 2, [Member Member2], [], [Int]),
    instr!(OP   ShRefStructRef2 "SH_REF_STRUCTREF2", 2, [Member Member2], [Page], [Int]),
    instr!(OP   ShStructRef3 "SH_STRUCTREF3", 3, [Member Member2 Member3], [], [Int]),
    instr!(JMP  ShStructRef2CallMethodNoParam "SH_STRUCTREF2_CALLMETHOD_NO_PARAM", 3, [Member Member2 Func], [], []),
    instr!(JMP  ShIfStructRefZ "SH_IF_STRUCTREF_Z", 2, [Member Address], [], []),
    instr!(JMP  ShIfStructANotEmpty "SH_IF_STRUCT_A_NOT_EMPTY", 2, [Member Address], [], []),
    instr!(JMP  ShIfLocGtImm "SH_IF_LOC_GT_IMM", 3, [Local Int Address], [], []),
    instr!(JMP  ShIfStructRefNeImm "SH_IF_STRUCTREF_NE_IMM", 3, [Member Int Address], [], []),
    instr!(JMP  ThisCallMethodNoParam "THISCALLMETHOD_NOPARAM", 1, [Func], [], []),
    instr!(JMP  ShIfLocNeImm "SH_IF_LOC_NE_IMM", 3, [Local Int Address], [], []),
    instr!(JMP  ShIfStructRefEqImm "SH_IF_STRUCTREF_EQ_IMM", 3, [Member Int Address], [], []),
    instr!(OP   ShGlobalAssignImm "SH_GLOBAL_ASSIGN_IMM", 2, [Global Int], [], []),
    instr!(OP   ShLocalStructAssignImm "SH_LOCALSTRUCT_ASSIGN_IMM", 3, [Local LocalMember Int], [], []),
    instr!(OP   ShStructAPushBackLocalStruct "SH_STRUCT_A_PUSHBACK_LOCAL_STRUCT", 2, [Member Local], [], []),
    instr!(OP   ShGlobalAPushBackLocalStruct "SH_GLOBAL_A_PUSHBACK_LOCAL_STRUCT", 2, [Global Local], [], []),
    instr!(OP   ShLocalAPushBackLocalStruct "SH_LOCAL_A_PUSHBACK_LOCAL_STRUCT", 2, [Local Local], [], []),
    instr!(JMP  ShIfSrefNeStr0 "SH_IF_SREF_NE_STR0", 2, [String Address], [Page Var], []),
    instr!(OP   ShSAssignRef "SH_S_ASSIGN_REF", 0, [], [String Page Var], []),
    instr!(TODO ShAFindSref "SH_A_FIND_SREF", 0, [], [], []),
    instr!(OP   ShSrefEmpty "SH_SREF_EMPTY", 0, [], [Page Var], [Int]),
    instr!(OP   ShStructSrefEqLocalSref "SH_STRUCTSREF_EQ_LOCALSREF", 2, [Member Local], [], [Int]),
    instr!(OP   ShLocalSrefEqStr0 "SH_LOCALSREF_EQ_STR0", 2, [Local String], [], [Int]),
    instr!(OP   ShStructSrefNeLocalSref "SH_STRUCTSREF_NE_LOCALSREF", 2, [Member Local], [], [Int]),
    instr!(OP   ShLocalSrefNeStr0 "SH_LOCALSREF_NE_STR0", 2, [Local String], [], [Int]),
    instr!(OP   ShStructSrRef "SH_STRUCT_SR_REF", 2, [Member Struct], [], [Page]),
    instr!(OP   ShStructSRef "SH_STRUCT_S_REF", 1, [Member], [], [String]),
    instr!(OP   SRef2 "S_REF2", 1, [Member], [Page], [String]),
    instr!(OP   ShRefLocalAssignStructRef2 "SH_REF_LOCAL_ASSIGN_STRUCTREF2", 3, [Member Local Member2], [], []),
    instr!(OP   ShGlobalSRef "SH_GLOBAL_S_REF", 1, [Global], [], [String]),
    instr!(OP   ShLocalSRef "SH_LOCAL_S_REF", 1, [Local], [], [String]),
    instr!(OP   ShLocalRefSAssignLocalSref "SH_LOCALREF_SASSIGN_LOCALSREF", 2, [Local Local], [], []),
    instr!(OP   ShLocalAPushBackLocalSref "SH_LOCAL_APUSHBACK_LOCALSREF", 2, [Local Local], [], []),
    instr!(OP   ShSAssignCallSys19 "SH_S_ASSIGN_CALLSYS19", 0, [], [String Func], []),
    instr!(OP   ShSAssignStr0 "SH_S_ASSIGN_STR0", 1, [String], [String], []),
    instr!(OP   ShSAssignLocalSref "SH_SASSIGN_LOCALSREF", 1, [Local], [String], []),
    instr!(OP   ShStructRefSAssignLocalSref "SH_STRUCTREF_SASSIGN_LOCALSREF", 2, [Member Local], [], []),
    instr!(OP   ShLocalSrefEmpty "SH_LOCALSREF_EMPTY", 1, [Local], [], [Int]),
    instr!(OP   ShGlobalAPushBackLocalSref "SH_GLOBAL_APUSHBACK_LOCALSREF", 2, [Global Local], [], []),
    instr!(OP   ShStructAPushBackLocalSref "SH_STRUCT_APUSHBACK_LOCALSREF", 2, [Member Local], [], []),
    instr!(OP   ShStructSrefEmpty "SH_STRUCTSREF_EMPTY", 1, [Member], [], [Int]),
    instr!(OP   ShGlobalSrefEmpty "SH_GLOBALSREF_EMPTY", 1, [Global], [], [Int]),
    instr!(OP   ShSAssignStructSref "SH_SASSIGN_STRUCTSREF", 1, [Member], [], [String]),
    instr!(OP   ShSAssignGlobalSref "SH_SASSIGN_GLOBALSREF", 1, [Global], [], [String]),
    instr!(OP   ShStructSrefNeStr0 "SH_STRUCTSREF_NE_STR0", 2, [Member String], [], [Int]),
    instr!(OP   ShGlobalSrefNeStr0 "SH_GLOBALSREF_NE_STR0", 2, [Global String], [], [Int]),
    instr!(OP   ShLocLtImmOrLocGeImm "SH_LOC_LT_IMM_OR_LOC_GE_IMM", 3, [Local Int Int], [], [Int]),
    instr!(TODO ASortMem "A_SORT_MEM", 0, [], [Page Var Int], []),
    instr!(OP   DgSet "DG_SET", 0, [], [Page Page Func], []),
    instr!(OP   DgAdd "DG_ADD", 0, [], [Page Page Func], []),
    instr!(JMP  DgCall "DG_CALL", 2, [Delegate Address], [], []),
    instr!(OP   DgNumof "DG_NUMOF", 0, [], [Page], [Int]),
    instr!(TODO DgExist "DG_EXIST", 0, [], [], []),
    instr!(TODO DgErase "DG_ERASE", 0, [], [], []),
    instr!(OP   DgClear "DG_CLEAR", 0, [], [Page], []),
    instr!(OP   DgCopy "DG_COPY", 0, [], [Page], [Page]),
    instr!(OP   DgAssign "DG_ASSIGN", 0, [], [Page Page], [Page]),
    instr!(OP   DgPlusA "DG_PLUSA", 0, [], [Page Page], [Page]),
    instr!(OP   DgPop "DG_POP", 0, [], [Page], []),
    instr!(OP   DgNewFromMethod "DG_NEW_FROM_METHOD", 0, [], [Page Func], [Page]),
    instr!(OP   DgMinusA "DG_MINUSA", 0, [], [Page Page], [Page]),
    instr!(OP   DgCallBegin "DG_CALLBEGIN", 1, [Delegate], [Page], []),
    instr!(TODO DgNew "DG_NEW", 0, [], [], []),
    instr!(TODO DgStrToMethod "DG_STR_TO_METHOD", 0, [Delegate], [], []),
    instr!(TODO Op0x102 "OP_0X102", 0, [], [], []),
    instr!(TODO XGetEnv "X_GETENV", 0, [], [], []),
    instr!(TODO XSet "X_SET", 0, [], [], []),
    instr!(TODO XIcast "X_ICAST", 1, [Struct], [], []),
    instr!(TODO XOpSet "X_OP_SET", 1, [Int], [], []),
    instr!(TODO Op0x107 "OP_0X107", 0, [], [], []),
    instr!(TODO Op0x108 "OP_0X108", 0, [], [], []),
    instr!(TODO Op0x109 "OP_0X109", 0, [], [], []),
    instr!(TODO XDup "X_DUP", 1, [Int], [], []),
    instr!(TODO XMov "X_MOV", 2, [Int Int], [], []),
    instr!(TODO XRef "X_REF", 1, [Int], [], []),
    instr!(TODO XAssign "X_ASSIGN", 1, [Int], [], []),
    instr!(TODO XAInit "X_A_INIT", 1, [Int], [], []),
    instr!(TODO XASize "X_A_SIZE", 0, [], [], []),
    instr!(TODO XToStr "X_TO_STR", 1, [Int], [], []),
];

/// A per-image instruction table with the version-sensitive entries
/// patched for the given `ain` version.
#[derive(Debug, Clone)]
pub struct InstructionTable {
    instrs: Vec<Instruction>,
}

impl InstructionTable {
    #[must_use]
    pub fn new(version: i32) -> InstructionTable {
        let mut instrs = INSTRUCTIONS.to_vec();
        if version >= 11 {
            instrs[Opcode::New as usize].nr_args = 2;
            instrs[Opcode::CallHll as usize].nr_args = 3;
            instrs[Opcode::SMod as usize].nr_args = 1;
            instrs[Opcode::ObjSwap as usize].nr_args = 1;
            instrs[Opcode::DgStrToMethod as usize].nr_args = 1;
            instrs[Opcode::CallMethod as usize].args[0] = ArgType::Int;
        }
        InstructionTable { instrs }
    }

    /// Look up an instruction by its raw opcode word. The breakpoint bit
    /// is masked off; out-of-range opcodes yield `None`.
    #[must_use]
    pub fn get(&self, opcode: u16) -> Option<&Instruction> {
        self.instrs.get((opcode & !BREAKPOINT_BIT) as usize)
    }

    #[must_use]
    pub fn by_opcode(&self, opcode: Opcode) -> &Instruction {
        &self.instrs[opcode as usize]
    }

    /// Encoded width of an instruction in the code section.
    #[must_use]
    pub fn width(&self, opcode: u16) -> usize {
        self.get(opcode).map_or(2, Instruction::width)
    }
}

impl Default for InstructionTable {
    fn default() -> Self {
        InstructionTable::new(0)
    }
}

/// One system-call signature.
#[derive(Debug, Clone, Copy)]
pub struct Syscall {
    pub code: u32,
    pub name: &'static str,
    pub return_type: DataType,
    pub args: &'static [DataType],
}

macro_rules! sys {
    ($code:literal $name:literal, $ret:ident, [$($a:ident)*]) => {
        Syscall {
            code: $code,
            name: concat!("system.", $name),
            return_type: DataType::$ret,
            args: &[$(DataType::$a),*],
        }
    };
}

pub const NR_SYSCALLS: usize = 29;

pub static SYSCALLS: [Syscall; NR_SYSCALLS] = [
    sys!(0 "Exit", Void, [Int]),
    sys!(1 "GlobalSave", Int, [String String]),
    sys!(2 "GlobalLoad", Int, [String String]),
    sys!(3 "LockPeek", Int, []),
    sys!(4 "UnlockPeek", Int, []),
    sys!(5 "Reset", Void, []),
    sys!(6 "Output", String, [String]),
    sys!(7 "MsgBox", String, [String]),
    sys!(8 "ResumeSave", Int, [String String RefInt]),
    sys!(9 "ResumeLoad", Void, [String String]),
    sys!(10 "ExistsFile", Int, [String]),
    sys!(11 "OpenWeb", Void, [String]),
    sys!(12 "GetSaveFolderName", String, []),
    sys!(13 "GetTime", Int, []),
    sys!(14 "GetGameName", String, []),
    sys!(15 "Error", String, [String]),
    sys!(16 "ExistsSaveFile", Int, [String]),
    sys!(17 "IsDebugMode", Int, []),
    sys!(18 "MsgBoxOkCancel", Int, [String]),
    sys!(19 "GetFuncStackName", String, [Int]),
    sys!(20 "Peek", Void, []),
    sys!(21 "Sleep", Void, [Int]),
    sys!(22 "GroupSave", Int, [String String String RefInt]),
    sys!(23 "GroupLoad", Int, [String String String RefInt]),
    sys!(24 "ResumeWriteComment", Bool, [String String RefArrayString]),
    sys!(25 "ResumeReadComment", Bool, [String String RefArrayString]),
    sys!(26 "DeleteSaveFile", Int, [String]),
    sys!(27 "ExistFunc", Bool, [String]),
    sys!(28 "CopySaveFile", Int, [String String]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_slots_match_opcode_ids() {
        for (i, instr) in INSTRUCTIONS.iter().enumerate() {
            assert_eq!(instr.opcode as usize, i, "slot {i} holds {}", instr.name);
        }
    }

    #[test]
    fn version_patching() {
        let old = InstructionTable::new(8);
        let new = InstructionTable::new(11);
        assert_eq!(old.by_opcode(Opcode::CallHll).nr_args, 2);
        assert_eq!(new.by_opcode(Opcode::CallHll).nr_args, 3);
        assert_eq!(old.by_opcode(Opcode::New).nr_args, 0);
        assert_eq!(new.by_opcode(Opcode::New).nr_args, 2);
        assert_eq!(old.by_opcode(Opcode::CallMethod).args[0], ArgType::Func);
        assert_eq!(new.by_opcode(Opcode::CallMethod).args[0], ArgType::Int);
    }

    #[test]
    fn widths() {
        let t = InstructionTable::new(0);
        assert_eq!(t.by_opcode(Opcode::Push).width(), 6);
        assert_eq!(t.by_opcode(Opcode::Pop).width(), 2);
        assert_eq!(t.by_opcode(Opcode::Jump).ip_inc(), 0);
        assert_eq!(t.by_opcode(Opcode::Push).ip_inc(), 6);
    }

    #[test]
    fn breakpoint_bit_is_masked() {
        let t = InstructionTable::new(0);
        let instr = t.get(0x8000 | Opcode::SPush as u16).unwrap();
        assert_eq!(instr.opcode, Opcode::SPush);
    }
}
