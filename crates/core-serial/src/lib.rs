//! core-serial: canonical value serialization and the module repository.
//!
//! Values are written as a stream of operation codes plus sub-value
//! references. A registry of previously written values turns repeats into
//! back-references; on the way back in, the registry preserves identity
//! for atoms (through the runtime's atom index) and for interned values
//! generally. Serialization is deterministic for a fixed opcode set:
//! containers iterate in insertion order and atoms travel by name.
//!
//! Cycles: the only value shape that can close a cycle is a variable, and
//! a variable registers itself *before* its content is written, so a
//! self-referential cell round-trips. Any other in-flight repeat is
//! reported as a cyclic-structure failure rather than looping.

pub mod opcodes;
pub mod repository;

use ahash::AHashMap;

use core_exec::continuation;
use core_exec::Runtime;
use core_value::descriptor::{Numeric, Tag};
use core_value::{
    atom, map, object, phrase, scalar, set, tuple, types, variable, DeclarationKind, ExtInt,
    PhraseTypeKind, RangeData, SimpleKind, TypeData, Value,
};
use thiserror::Error;

pub use opcodes::SerialOpcode;
pub use repository::{ModuleRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("value cannot be serialized: {0}")]
    Unserializable(String),
    #[error("cyclic structure through a non-variable value")]
    CyclicStructure,
    #[error("truncated stream at byte {0}")]
    Truncated(usize),
    #[error("unknown opcode {0} at byte {1}")]
    UnknownOpcode(u8, usize),
    #[error("malformed stream: {0}")]
    Malformed(String),
}

// -------------------------------------------------------------------------
// Byte-level encoding
// -------------------------------------------------------------------------

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn write_signed(out: &mut Vec<u8>, value: i64) {
    // Zigzag.
    write_varint(out, ((value << 1) ^ (value >> 63)) as u64);
}

fn write_str(out: &mut Vec<u8>, text: &str) {
    write_varint(out, text.len() as u64);
    out.extend_from_slice(text.as_bytes());
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn read_u8(&mut self) -> Result<u8, SerializationError> {
        let byte = self
            .bytes
            .get(self.position)
            .copied()
            .ok_or(SerializationError::Truncated(self.position))?;
        self.position += 1;
        Ok(byte)
    }

    fn read_varint(&mut self) -> Result<u64, SerializationError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(SerializationError::Malformed("varint overflow".into()));
            }
        }
    }

    fn read_signed(&mut self) -> Result<i64, SerializationError> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_str(&mut self) -> Result<String, SerializationError> {
        let len = self.read_varint()? as usize;
        let end = self.position + len;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or(SerializationError::Truncated(self.position))?;
        self.position = end;
        String::from_utf8(slice.to_vec())
            .map_err(|_| SerializationError::Malformed("non-UTF-8 string".into()))
    }
}

// -------------------------------------------------------------------------
// Serializer
// -------------------------------------------------------------------------

pub struct Serializer<'rt> {
    runtime: &'rt Runtime,
    out: Vec<u8>,
    /// Completed values, by logical equality, to their stream index.
    registry: AHashMap<Value, u32>,
    next_index: u32,
    /// Non-variable values currently being written (cycle detection).
    in_flight: Vec<Value>,
}

impl<'rt> Serializer<'rt> {
    pub fn new(runtime: &'rt Runtime) -> Serializer<'rt> {
        Serializer {
            runtime,
            out: Vec::new(),
            registry: AHashMap::new(),
            next_index: 0,
            in_flight: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    fn opcode(&mut self, opcode: SerialOpcode) {
        self.out.push(opcode as u8);
    }

    /// Reserve the next registry index for a value (called once per
    /// top-level emission of that value).
    fn register(&mut self, value: &Value) -> u32 {
        let index = self.next_index;
        self.registry.insert(value.clone(), index);
        self.next_index += 1;
        index
    }

    pub fn serialize(&mut self, value: &Value) -> Result<(), SerializationError> {
        let value = value.traversed();
        if let Some(index) = self.registry.get(&value).copied() {
            self.opcode(SerialOpcode::BackReference);
            write_varint(&mut self.out, index as u64);
            return Ok(());
        }
        if self.in_flight.iter().any(|seen| seen.same_identity_as(&value)) {
            return Err(SerializationError::CyclicStructure);
        }
        match value.tag() {
            Tag::Variable => self.serialize_variable(&value),
            _ => {
                self.in_flight.push(value.clone());
                let result = self.serialize_body(&value);
                self.in_flight.pop();
                result?;
                self.register(&value);
                Ok(())
            }
        }
    }

    fn serialize_variable(&mut self, value: &Value) -> Result<(), SerializationError> {
        // Register the cell before its content so self-reference becomes a
        // back-reference.
        self.opcode(SerialOpcode::Variable);
        self.register(value);
        let descriptor = value.descriptor();
        let payload = descriptor.variable_payload().expect("variable value");
        self.serialize(&payload.read_type().clone())?;
        self.serialize(&payload.write_type().clone())?;
        match variable::variable_read(value) {
            Ok(content) => {
                self.out.push(1);
                self.serialize(&content)
            }
            Err(_) => {
                self.out.push(0);
                Ok(())
            }
        }
    }

    fn serialize_body(&mut self, value: &Value) -> Result<(), SerializationError> {
        match value.tag() {
            Tag::Nil => {
                self.opcode(SerialOpcode::Nil);
                Ok(())
            }
            Tag::Integer => {
                self.opcode(SerialOpcode::Integer);
                write_signed(&mut self.out, scalar::int_of(value).expect("integer"));
                Ok(())
            }
            Tag::Infinity => {
                match value.descriptor().numeric() {
                    Some(Numeric::Infinity { positive: true }) => {
                        self.opcode(SerialOpcode::PositiveInfinity)
                    }
                    _ => self.opcode(SerialOpcode::NegativeInfinity),
                }
                Ok(())
            }
            Tag::Double => {
                self.opcode(SerialOpcode::Double);
                let bits = scalar::double_of(value).expect("double").to_bits();
                self.out.extend_from_slice(&bits.to_le_bytes());
                Ok(())
            }
            Tag::Character => {
                self.opcode(SerialOpcode::Character);
                write_varint(
                    &mut self.out,
                    scalar::char_of(value).expect("character") as u64,
                );
                Ok(())
            }
            Tag::Atom => {
                if value.equals(&atom::true_value()) {
                    self.opcode(SerialOpcode::True);
                    return Ok(());
                }
                if value.equals(&atom::false_value()) {
                    self.opcode(SerialOpcode::False);
                    return Ok(());
                }
                self.opcode(SerialOpcode::Atom);
                let name = atom::name_of(value).expect("atom has a name");
                write_str(&mut self.out, &name);
                Ok(())
            }
            Tag::Tuple => {
                if let Some(text) = tuple::string_of(value) {
                    self.opcode(SerialOpcode::StringLiteral);
                    write_str(&mut self.out, &text);
                    return Ok(());
                }
                self.opcode(SerialOpcode::Tuple);
                let elements = tuple::elements(value);
                write_varint(&mut self.out, elements.len() as u64);
                for element in &elements {
                    self.serialize(element)?;
                }
                Ok(())
            }
            Tag::Map => {
                self.opcode(SerialOpcode::Map);
                let entries = map::map_entries(value);
                write_varint(&mut self.out, entries.len() as u64);
                for (key, entry_value) in &entries {
                    self.serialize(key)?;
                    self.serialize(entry_value)?;
                }
                Ok(())
            }
            Tag::Set => {
                self.opcode(SerialOpcode::Set);
                let items = set::set_items(value);
                write_varint(&mut self.out, items.len() as u64);
                for item in &items {
                    self.serialize(item)?;
                }
                Ok(())
            }
            Tag::Object => {
                self.opcode(SerialOpcode::Object);
                let descriptor = value.descriptor();
                let payload = descriptor.object_payload().expect("object value");
                write_varint(&mut self.out, payload.len() as u64);
                let fields: Vec<(Value, Value)> = payload.fields().cloned().collect();
                for (field_atom, field_value) in fields {
                    self.serialize(&field_atom)?;
                    self.serialize(&field_value)?;
                }
                Ok(())
            }
            Tag::Type => self.serialize_type(value),
            Tag::RawFunction => self.serialize_code(value),
            Tag::Function => {
                self.opcode(SerialOpcode::Function);
                let data = core_code::function_data(value).expect("function value");
                self.serialize(&data.code)?;
                write_varint(&mut self.out, data.outers.len() as u64);
                for outer in &data.outers {
                    self.serialize(outer)?;
                }
                Ok(())
            }
            Tag::Continuation => self.serialize_continuation(value),
            Tag::Phrase => self.serialize_phrase(value),
            Tag::Fiber | Tag::Indirection => Err(SerializationError::Unserializable(format!(
                "{:?}",
                value.tag()
            ))),
            Tag::Variable => unreachable!("Tag::Variable is dispatched in serialize()"),
        }
    }

    fn serialize_range(&mut self, range: &RangeData) {
        let encode = |this: &mut Serializer<'_>, bound: ExtInt, inclusive: bool| {
            match bound {
                ExtInt::NegInf => this.out.push(0),
                ExtInt::PosInf => this.out.push(1),
                ExtInt::Fin(v) => {
                    this.out.push(2);
                    write_signed(&mut this.out, v);
                }
            }
            this.out.push(inclusive as u8);
        };
        encode(self, range.lower, range.lower_inclusive);
        encode(self, range.upper, range.upper_inclusive);
    }

    fn serialize_type(&mut self, value: &Value) -> Result<(), SerializationError> {
        let data = types::type_data_of(value).expect("type value");
        match data.as_ref() {
            TypeData::Any => self.opcode(SerialOpcode::TypeAny),
            TypeData::Simple(kind) => {
                self.opcode(SerialOpcode::TypeSimple);
                self.out.push(match kind {
                    SimpleKind::Character => 0,
                    SimpleKind::Double => 1,
                    SimpleKind::Atom => 2,
                });
            }
            TypeData::IntegerRange(range) => {
                self.opcode(SerialOpcode::TypeIntegerRange);
                self.serialize_range(range);
            }
            TypeData::Tuple {
                sizes,
                leading,
                default,
            } => {
                self.opcode(SerialOpcode::TypeTuple);
                self.serialize_range(sizes);
                write_varint(&mut self.out, leading.len() as u64);
                for leading_type in leading {
                    self.serialize(leading_type)?;
                }
                self.serialize(default)?;
            }
            TypeData::Map { sizes, key, value: value_type } => {
                self.opcode(SerialOpcode::TypeMap);
                self.serialize_range(sizes);
                self.serialize(key)?;
                self.serialize(value_type)?;
            }
            TypeData::Set { sizes, element } => {
                self.opcode(SerialOpcode::TypeSet);
                self.serialize_range(sizes);
                self.serialize(element)?;
            }
            TypeData::Function { args, returns } => {
                self.opcode(SerialOpcode::TypeFunction);
                self.serialize(args)?;
                self.serialize(returns)?;
            }
            TypeData::Variable { read, write } => {
                self.opcode(SerialOpcode::TypeVariable);
                self.serialize(read)?;
                self.serialize(write)?;
            }
            TypeData::Object { fields } => {
                self.opcode(SerialOpcode::TypeObject);
                write_varint(&mut self.out, fields.len() as u64);
                for (field_atom, field_type) in fields {
                    self.serialize(field_atom)?;
                    self.serialize(field_type)?;
                }
            }
            TypeData::Continuation { function_type } => {
                self.opcode(SerialOpcode::TypeContinuation);
                self.serialize(function_type)?;
            }
            TypeData::Phrase { kind, yields } => {
                self.opcode(SerialOpcode::TypePhrase);
                write_varint(&mut self.out, kind.ordinal() as u64);
                self.serialize(yields)?;
            }
            TypeData::Enumeration { instances } => {
                self.opcode(SerialOpcode::TypeEnumeration);
                write_varint(&mut self.out, instances.len() as u64);
                for instance in instances {
                    self.serialize(instance)?;
                }
            }
            TypeData::Meta { instance } => {
                self.opcode(SerialOpcode::TypeMeta);
                self.serialize(instance)?;
            }
        }
        Ok(())
    }

    fn serialize_code(&mut self, value: &Value) -> Result<(), SerializationError> {
        self.opcode(SerialOpcode::Code);
        let data = core_code::code_data(value).expect("code value");
        write_str(&mut self.out, &data.name);
        write_varint(&mut self.out, data.num_args as u64);
        write_varint(&mut self.out, data.local_types.len() as u64);
        for local_type in &data.local_types {
            self.serialize(local_type)?;
        }
        write_varint(&mut self.out, data.max_stack as u64);
        write_varint(&mut self.out, data.primitive as u64);
        match &data.failure_variable_type {
            Some(failure_type) => {
                self.out.push(1);
                self.serialize(failure_type)?;
            }
            None => self.out.push(0),
        }
        write_varint(&mut self.out, data.literals.len() as u64);
        for literal in &data.literals {
            self.serialize(literal)?;
        }
        write_varint(&mut self.out, data.nybbles.len() as u64);
        self.out.extend_from_slice(&data.nybbles);
        self.serialize(&data.function_type)
    }

    fn serialize_continuation(&mut self, value: &Value) -> Result<(), SerializationError> {
        self.opcode(SerialOpcode::Continuation);
        let data = continuation::continuation_data(value).expect("continuation value");
        self.serialize(&data.caller)?;
        self.serialize(&data.function)?;
        let (pc, stackp, slots, skip, expected) = data.with_state(|state| {
            (
                state.pc,
                state.stackp,
                state.slots.clone(),
                state.skip_return,
                state.expected_return_type.clone(),
            )
        });
        write_varint(&mut self.out, pc as u64);
        write_varint(&mut self.out, stackp as u64);
        self.out.push(skip as u8);
        match expected {
            Some(expected_type) => {
                self.out.push(1);
                self.serialize(&expected_type)?;
            }
            None => self.out.push(0),
        }
        write_varint(&mut self.out, slots.len() as u64);
        for slot in &slots {
            self.serialize(slot)?;
        }
        Ok(())
    }

    fn serialize_phrase(&mut self, value: &Value) -> Result<(), SerializationError> {
        // Phrases travel as their structural parts; reconstruction is in
        // the deserializer's phrase table.
        let descriptor = value.descriptor();
        let data = descriptor.phrase_data().expect("phrase value");
        self.opcode(SerialOpcode::Phrase);
        match data {
            phrase::PhraseData::Literal { value: literal } => {
                self.out.push(0);
                self.serialize(literal)
            }
            phrase::PhraseData::List { items } => {
                self.out.push(1);
                write_varint(&mut self.out, items.len() as u64);
                for item in items {
                    self.serialize(item)?;
                }
                Ok(())
            }
            phrase::PhraseData::Send {
                message,
                arguments,
                return_type,
            } => {
                self.out.push(2);
                self.serialize(message)?;
                self.serialize(arguments)?;
                self.serialize(return_type)
            }
            phrase::PhraseData::Declaration {
                kind,
                name,
                declared_type,
                initializer,
            } => {
                self.out.push(3);
                self.out.push(*kind as u8);
                self.serialize(name)?;
                self.serialize(declared_type)?;
                match initializer {
                    Some(init) => {
                        self.out.push(1);
                        self.serialize(init)
                    }
                    None => {
                        self.out.push(0);
                        Ok(())
                    }
                }
            }
            phrase::PhraseData::VariableUse { declaration } => {
                self.out.push(4);
                self.serialize(declaration)
            }
            other => Err(SerializationError::Unserializable(format!(
                "phrase kind {:?}",
                other.phrase_kind()
            ))),
        }
    }
}

// -------------------------------------------------------------------------
// Deserializer
// -------------------------------------------------------------------------

pub struct Deserializer<'rt> {
    runtime: &'rt Runtime,
}

impl<'rt> Deserializer<'rt> {
    pub fn new(runtime: &'rt Runtime) -> Deserializer<'rt> {
        Deserializer { runtime }
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        let mut reader = ByteReader { bytes, position: 0 };
        let mut registry: Vec<Value> = Vec::new();
        self.read_value(&mut reader, &mut registry)
    }

    fn read_range(&self, reader: &mut ByteReader<'_>) -> Result<RangeData, SerializationError> {
        let bound = |reader: &mut ByteReader<'_>| -> Result<(ExtInt, bool), SerializationError> {
            let kind = reader.read_u8()?;
            let value = match kind {
                0 => ExtInt::NegInf,
                1 => ExtInt::PosInf,
                2 => ExtInt::Fin(reader.read_signed()?),
                other => {
                    return Err(SerializationError::Malformed(format!(
                        "range bound kind {other}"
                    )));
                }
            };
            let inclusive = reader.read_u8()? != 0;
            Ok((value, inclusive))
        };
        let (lower, lower_inclusive) = bound(reader)?;
        let (upper, upper_inclusive) = bound(reader)?;
        RangeData::new(lower, lower_inclusive, upper, upper_inclusive)
            .ok_or_else(|| SerializationError::Malformed("empty range".into()))
    }

    fn read_value(
        &self,
        reader: &mut ByteReader<'_>,
        registry: &mut Vec<Value>,
    ) -> Result<Value, SerializationError> {
        let at = reader.position;
        let opcode = SerialOpcode::from_byte(reader.read_u8()?)
            .ok_or(SerializationError::UnknownOpcode(bytes_at(reader, at), at))?;
        let value = match opcode {
            SerialOpcode::BackReference => {
                let index = reader.read_varint()? as usize;
                return registry
                    .get(index)
                    .cloned()
                    .ok_or_else(|| SerializationError::Malformed("dangling back-reference".into()));
            }
            SerialOpcode::Nil => scalar::nil(),
            SerialOpcode::False => atom::false_value(),
            SerialOpcode::True => atom::true_value(),
            SerialOpcode::Integer => scalar::integer(reader.read_signed()?),
            SerialOpcode::PositiveInfinity => scalar::positive_infinity(),
            SerialOpcode::NegativeInfinity => scalar::negative_infinity(),
            SerialOpcode::Double => {
                let mut bits = [0u8; 8];
                for byte in &mut bits {
                    *byte = reader.read_u8()?;
                }
                scalar::double(f64::from_bits(u64::from_le_bytes(bits)))
            }
            SerialOpcode::Character => {
                let code_point = reader.read_varint()? as u32;
                scalar::character(char::from_u32(code_point).ok_or_else(|| {
                    SerializationError::Malformed("invalid character".into())
                })?)
            }
            SerialOpcode::Atom => {
                let name = reader.read_str()?;
                self.runtime.atom_named(&name)
            }
            SerialOpcode::StringLiteral => tuple::string_value(&reader.read_str()?),
            SerialOpcode::Tuple => {
                let len = reader.read_varint()? as usize;
                let mut elements = Vec::with_capacity(len);
                for _ in 0..len {
                    elements.push(self.read_value(reader, registry)?);
                }
                tuple::tuple_from_values(elements).make_immutable()
            }
            SerialOpcode::Map => {
                let len = reader.read_varint()? as usize;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let key = self.read_value(reader, registry)?;
                    let entry_value = self.read_value(reader, registry)?;
                    entries.push((key, entry_value));
                }
                map::map_from_entries(entries).make_immutable()
            }
            SerialOpcode::Set => {
                let len = reader.read_varint()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value(reader, registry)?);
                }
                set::set_from_items(items).make_immutable()
            }
            SerialOpcode::Object => {
                let len = reader.read_varint()? as usize;
                let mut fields = Vec::with_capacity(len);
                for _ in 0..len {
                    let field_atom = self.read_value(reader, registry)?;
                    let field_value = self.read_value(reader, registry)?;
                    fields.push((field_atom, field_value));
                }
                object::object_from_fields(fields).make_immutable()
            }
            SerialOpcode::Variable => {
                // Mirror the writer: the cell registers before its content.
                let reservation = registry.len();
                registry.push(scalar::nil());
                let read_type = self.read_value(reader, registry)?;
                let write_type = self.read_value(reader, registry)?;
                let cell = variable::new_variable(read_type, write_type);
                registry[reservation] = cell.clone();
                if reader.read_u8()? != 0 {
                    let content = self.read_value(reader, registry)?;
                    variable::variable_write(&cell, content).map_err(|error| {
                        SerializationError::Malformed(format!("variable content: {error}"))
                    })?;
                }
                return Ok(cell);
            }
            SerialOpcode::TypeAny => types::any_type(),
            SerialOpcode::TypeSimple => match reader.read_u8()? {
                0 => types::character_type(),
                1 => types::double_type(),
                2 => types::atom_type(),
                other => {
                    return Err(SerializationError::Malformed(format!(
                        "simple kind {other}"
                    )));
                }
            },
            SerialOpcode::TypeIntegerRange => {
                let range = self.read_range(reader)?;
                types::range_type(range)
            }
            SerialOpcode::TypeTuple => {
                let sizes = self.read_range(reader)?;
                let len = reader.read_varint()? as usize;
                let mut leading = Vec::with_capacity(len);
                for _ in 0..len {
                    leading.push(self.read_value(reader, registry)?);
                }
                let default = self.read_value(reader, registry)?;
                types::tuple_type(sizes, leading, default)
            }
            SerialOpcode::TypeMap => {
                let sizes = self.read_range(reader)?;
                let key = self.read_value(reader, registry)?;
                let value_type = self.read_value(reader, registry)?;
                types::map_type(sizes, key, value_type)
            }
            SerialOpcode::TypeSet => {
                let sizes = self.read_range(reader)?;
                let element = self.read_value(reader, registry)?;
                types::set_type(sizes, element)
            }
            SerialOpcode::TypeFunction => {
                let args = self.read_value(reader, registry)?;
                let returns = self.read_value(reader, registry)?;
                types::function_type(args, returns)
            }
            SerialOpcode::TypeVariable => {
                let read = self.read_value(reader, registry)?;
                let write = self.read_value(reader, registry)?;
                types::variable_type(read, write)
            }
            SerialOpcode::TypeObject => {
                let len = reader.read_varint()? as usize;
                let mut fields = Vec::with_capacity(len);
                for _ in 0..len {
                    let field_atom = self.read_value(reader, registry)?;
                    let field_type = self.read_value(reader, registry)?;
                    fields.push((field_atom, field_type));
                }
                types::object_type(fields)
            }
            SerialOpcode::TypeContinuation => {
                let function_type = self.read_value(reader, registry)?;
                types::continuation_type(function_type)
            }
            SerialOpcode::TypePhrase => {
                let ordinal = reader.read_varint()? as u32;
                let kind = phrase_kind_from_ordinal(ordinal).ok_or_else(|| {
                    SerializationError::Malformed(format!("phrase kind ordinal {ordinal}"))
                })?;
                let yields = self.read_value(reader, registry)?;
                types::phrase_type(kind, yields)
            }
            SerialOpcode::TypeEnumeration => {
                let len = reader.read_varint()? as usize;
                let mut instances = Vec::with_capacity(len);
                for _ in 0..len {
                    instances.push(self.read_value(reader, registry)?);
                }
                types::enumeration_of(instances)
            }
            SerialOpcode::TypeMeta => {
                let instance = self.read_value(reader, registry)?;
                types::meta(instance)
            }
            SerialOpcode::Code => {
                let name = reader.read_str()?;
                let num_args = reader.read_varint()? as usize;
                let locals = reader.read_varint()? as usize;
                let mut local_types = Vec::with_capacity(locals);
                for _ in 0..locals {
                    local_types.push(self.read_value(reader, registry)?);
                }
                let max_stack = reader.read_varint()? as usize;
                let primitive = reader.read_varint()? as u16;
                let failure_variable_type = if reader.read_u8()? != 0 {
                    Some(self.read_value(reader, registry)?)
                } else {
                    None
                };
                let literal_count = reader.read_varint()? as usize;
                let mut literals = Vec::with_capacity(literal_count);
                for _ in 0..literal_count {
                    literals.push(self.read_value(reader, registry)?);
                }
                let nybble_count = reader.read_varint()? as usize;
                let mut nybbles = Vec::with_capacity(nybble_count);
                for _ in 0..nybble_count {
                    nybbles.push(reader.read_u8()?);
                }
                let function_type = self.read_value(reader, registry)?;
                core_code::code_value(
                    name,
                    num_args,
                    local_types,
                    max_stack,
                    primitive,
                    failure_variable_type,
                    literals,
                    nybbles,
                    function_type,
                )
            }
            SerialOpcode::Function => {
                let code = self.read_value(reader, registry)?;
                let outer_count = reader.read_varint()? as usize;
                let mut outers = Vec::with_capacity(outer_count);
                for _ in 0..outer_count {
                    outers.push(self.read_value(reader, registry)?);
                }
                core_code::function_value(code, outers)
            }
            SerialOpcode::Continuation => {
                let caller = self.read_value(reader, registry)?;
                let function = self.read_value(reader, registry)?;
                let pc = reader.read_varint()? as usize;
                let stackp = reader.read_varint()? as usize;
                let skip = reader.read_u8()? != 0;
                let expected = if reader.read_u8()? != 0 {
                    Some(self.read_value(reader, registry)?)
                } else {
                    None
                };
                let slot_count = reader.read_varint()? as usize;
                let mut slots = Vec::with_capacity(slot_count);
                for _ in 0..slot_count {
                    slots.push(self.read_value(reader, registry)?);
                }
                continuation::reconstruct(caller, function, pc, stackp, slots, skip, expected)
            }
            SerialOpcode::Phrase => self.read_phrase(reader, registry)?,
        };
        registry.push(value.clone());
        Ok(value)
    }

    fn read_phrase(
        &self,
        reader: &mut ByteReader<'_>,
        registry: &mut Vec<Value>,
    ) -> Result<Value, SerializationError> {
        match reader.read_u8()? {
            0 => {
                let literal = self.read_value(reader, registry)?;
                Ok(phrase::literal_phrase(literal))
            }
            1 => {
                let len = reader.read_varint()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value(reader, registry)?);
                }
                Ok(phrase::list_phrase(items))
            }
            2 => {
                let message = self.read_value(reader, registry)?;
                let arguments = self.read_value(reader, registry)?;
                let return_type = self.read_value(reader, registry)?;
                Ok(phrase::send_phrase(message, arguments, return_type))
            }
            3 => {
                let kind = declaration_kind_from_byte(reader.read_u8()?)?;
                let name = self.read_value(reader, registry)?;
                let declared_type = self.read_value(reader, registry)?;
                let initializer = if reader.read_u8()? != 0 {
                    Some(self.read_value(reader, registry)?)
                } else {
                    None
                };
                Ok(phrase::declaration_phrase(kind, name, declared_type, initializer))
            }
            4 => {
                let declaration = self.read_value(reader, registry)?;
                Ok(phrase::variable_use_phrase(declaration))
            }
            other => Err(SerializationError::Malformed(format!(
                "phrase payload {other}"
            ))),
        }
    }
}

fn bytes_at(reader: &ByteReader<'_>, at: usize) -> u8 {
    reader.bytes.get(at).copied().unwrap_or(0)
}

fn phrase_kind_from_ordinal(ordinal: u32) -> Option<PhraseTypeKind> {
    use PhraseTypeKind::*;
    Some(match ordinal {
        0 => ParsePhrase,
        1 => Expression,
        2 => Literal,
        3 => VariableUse,
        4 => List,
        5 => Sequence,
        6 => FirstOfSequence,
        7 => Assignment,
        8 => Reference,
        9 => Block,
        10 => SuperCast,
        11 => Send,
        12 => MacroSubstitution,
        16 => Declaration(DeclarationKind::Argument),
        17 => Declaration(DeclarationKind::Label),
        18 => Declaration(DeclarationKind::LocalConstant),
        19 => Declaration(DeclarationKind::LocalVariable),
        20 => Declaration(DeclarationKind::ModuleConstant),
        21 => Declaration(DeclarationKind::ModuleVariable),
        22 => Declaration(DeclarationKind::PrimitiveFailureReason),
        _ => return None,
    })
}

fn declaration_kind_from_byte(byte: u8) -> Result<DeclarationKind, SerializationError> {
    Ok(match byte {
        0 => DeclarationKind::Argument,
        1 => DeclarationKind::Label,
        2 => DeclarationKind::LocalConstant,
        3 => DeclarationKind::LocalVariable,
        4 => DeclarationKind::ModuleConstant,
        5 => DeclarationKind::ModuleVariable,
        6 => DeclarationKind::PrimitiveFailureReason,
        other => {
            return Err(SerializationError::Malformed(format!(
                "declaration kind {other}"
            )));
        }
    })
}

/// Convenience: serialize one value to bytes.
pub fn serialize_value(runtime: &Runtime, value: &Value) -> Result<Vec<u8>, SerializationError> {
    let mut serializer = Serializer::new(runtime);
    serializer.serialize(value)?;
    Ok(serializer.finish())
}

/// Convenience: deserialize one value from bytes.
pub fn deserialize_value(runtime: &Runtime, bytes: &[u8]) -> Result<Value, SerializationError> {
    Deserializer::new(runtime).deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(runtime: &Runtime, value: &Value) -> Value {
        let bytes = serialize_value(runtime, value).expect("serializes");
        deserialize_value(runtime, &bytes).expect("deserializes")
    }

    #[test]
    fn scalars_round_trip() {
        let runtime = Runtime::with_threads(1);
        for value in [
            scalar::nil(),
            scalar::integer(0),
            scalar::integer(-123456789),
            scalar::positive_infinity(),
            scalar::negative_infinity(),
            scalar::double(2.5),
            scalar::character('λ'),
            atom::true_value(),
            atom::false_value(),
        ] {
            assert!(round_trip(&runtime, &value).equals(&value), "{value:?}");
        }
    }

    #[test]
    fn containers_round_trip_with_content_equality() {
        let runtime = Runtime::with_threads(1);
        let value = map::map_from_entries(vec![
            (
                tuple::string_value("key"),
                tuple::tuple_from_values(vec![scalar::integer(1), scalar::integer(2)]),
            ),
            (
                scalar::integer(9),
                set::set_from_items(vec![scalar::character('a')]),
            ),
        ]);
        assert!(round_trip(&runtime, &value).equals(&value));
    }

    #[test]
    fn atoms_preserve_identity_within_a_process() {
        let runtime = Runtime::with_threads(1);
        let original = runtime.atom_named("chartreuse");
        let bytes = serialize_value(&runtime, &original).unwrap();
        let first = deserialize_value(&runtime, &bytes).unwrap();
        let second = deserialize_value(&runtime, &bytes).unwrap();
        assert!(first.same_identity_as(&original));
        assert!(second.same_identity_as(&original));
    }

    #[test]
    fn repeated_subvalues_become_back_references() {
        let runtime = Runtime::with_threads(1);
        let shared = tuple::string_value("shared-and-fairly-long-text");
        let value = tuple::tuple_from_values(vec![shared.clone(), shared.clone(), shared]);
        let bytes = serialize_value(&runtime, &value).unwrap();
        let solo = serialize_value(&runtime, &tuple::string_value("shared-and-fairly-long-text"))
            .unwrap();
        // Three copies cost far less than three bodies.
        assert!(bytes.len() < solo.len() * 2 + 16);
        assert!(deserialize_value(&runtime, &bytes).unwrap().equals(&value));
    }

    #[test]
    fn types_round_trip() {
        let runtime = Runtime::with_threads(1);
        let samples = vec![
            types::any_type(),
            types::bottom_type(),
            types::integers(),
            types::string_type(),
            types::boolean_type(),
            types::function_type_from(
                vec![types::integers(), types::string_type()],
                types::boolean_type(),
            ),
            types::variable_type(types::integers(), types::integers()),
            types::tuple_type_fixed(vec![types::character_type()]),
            types::meta(types::integers()),
        ];
        for ty in samples {
            let back = round_trip(&runtime, &ty);
            assert!(back.equals(&ty), "{ty:?}");
            assert_eq!(back.hash_value(), ty.hash_value());
        }
    }

    #[test]
    fn self_referential_variable_round_trips() {
        let runtime = Runtime::with_threads(1);
        let cell = variable::simple_variable(types::any_type());
        variable::variable_write(&cell, cell.clone()).unwrap();
        let back = round_trip(&runtime, &cell);
        let content = variable::variable_read(&back).unwrap();
        assert!(content.same_identity_as(&back));
    }

    #[test]
    fn code_and_functions_round_trip() {
        use core_code::{CodeBuilder, L1Operation};
        let runtime = Runtime::with_threads(1);
        let mut builder = CodeBuilder::new("the answer");
        builder.returns(types::integers());
        builder.push_literal(scalar::integer(42));
        builder.emit(L1Operation::Return);
        let function = core_code::function_value(builder.finish(), Vec::new());
        let back = round_trip(&runtime, &function);
        let result = runtime.run_function_now(back, Vec::new()).unwrap();
        assert!(result.equals(&scalar::integer(42)));
    }
}
