//! The serialization opcode set. Stable: repository payloads written by
//! one build must read back under any later build, so variants are only
//! ever appended.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerialOpcode {
    BackReference = 0,
    Nil = 1,
    False = 2,
    True = 3,
    Integer = 4,
    PositiveInfinity = 5,
    NegativeInfinity = 6,
    Double = 7,
    Character = 8,
    Atom = 9,
    StringLiteral = 10,
    Tuple = 11,
    Map = 12,
    Set = 13,
    Object = 14,
    Variable = 15,
    TypeAny = 16,
    TypeSimple = 17,
    TypeIntegerRange = 18,
    TypeTuple = 19,
    TypeMap = 20,
    TypeSet = 21,
    TypeFunction = 22,
    TypeVariable = 23,
    TypeObject = 24,
    TypeContinuation = 25,
    TypePhrase = 26,
    TypeEnumeration = 27,
    TypeMeta = 28,
    Code = 29,
    Function = 30,
    Continuation = 31,
    Phrase = 32,
}

impl SerialOpcode {
    pub fn from_byte(byte: u8) -> Option<SerialOpcode> {
        use SerialOpcode::*;
        Some(match byte {
            0 => BackReference,
            1 => Nil,
            2 => False,
            3 => True,
            4 => Integer,
            5 => PositiveInfinity,
            6 => NegativeInfinity,
            7 => Double,
            8 => Character,
            9 => Atom,
            10 => StringLiteral,
            11 => Tuple,
            12 => Map,
            13 => Set,
            14 => Object,
            15 => Variable,
            16 => TypeAny,
            17 => TypeSimple,
            18 => TypeIntegerRange,
            19 => TypeTuple,
            20 => TypeMap,
            21 => TypeSet,
            22 => TypeFunction,
            23 => TypeVariable,
            24 => TypeObject,
            25 => TypeContinuation,
            26 => TypePhrase,
            27 => TypeEnumeration,
            28 => TypeMeta,
            29 => Code,
            30 => Function,
            31 => Continuation,
            32 => Phrase,
            _ => return None,
        })
    }
}
