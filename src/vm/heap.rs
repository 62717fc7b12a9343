use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use super::object::{
    BoundMethod, Class, Closure, Function, Instance, LoxString, Native, Object, ObjectType, Upvalue,
};
use super::value::{Value, format_number};
use crate::config::RuntimeConfig;

/// Bytes charged per field or method table entry.
const TABLE_ENTRY_SIZE: usize = mem::size_of::<(GcRef, Value)>();

// =============================================================================
// GcRef - Handle to a heap object
// =============================================================================

/// A reference to a heap object.
///
/// The index is a slot in the heap arena. A slot is only reused after the
/// object in it has been swept, so a handle to a reachable object stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
}

impl GcRef {
    pub fn from_index(index: usize) -> Self {
        Self {
            index: index as u32,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// GC statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

#[derive(Debug)]
struct HeapEntry {
    marked: bool,
    /// Bytes charged to `bytes_allocated` when this object was allocated.
    size: usize,
    object: Object,
}

// =============================================================================
// Heap - Arena of objects with a mark-sweep collector
// =============================================================================

/// The garbage-collected heap.
///
/// Objects live in an arena of slots; freed slots go on a free list and are
/// reused by later allocations. The heap never decides on its own to collect:
/// allocating components check [`Heap::should_collect`] and call
/// [`Heap::collect`] with their roots before allocating.
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    /// Indices of vacant slots
    free_list: Vec<u32>,
    /// Intern table. Weak: sweep drops entries whose string died.
    strings: HashMap<Rc<str>, GcRef>,
    /// Bytes allocated (for GC threshold)
    bytes_allocated: usize,
    /// Collect once `bytes_allocated` exceeds this
    next_gc: usize,
    initial_threshold: usize,
    grow_factor: usize,
    stress: bool,
    log: bool,
    stats: GcStats,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            strings: HashMap::new(),
            bytes_allocated: 0,
            next_gc: config.gc_initial_threshold,
            initial_threshold: config.gc_initial_threshold,
            grow_factor: config.gc_grow_factor.max(1),
            stress: config.stress_gc,
            log: config.log_gc,
            stats: GcStats::default(),
        }
    }

    /// Whether the owner should run a collection before its next allocation.
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Allocate a new object. Never collects.
    pub fn alloc(&mut self, object: Object) -> GcRef {
        let size = object.size_hint();
        let kind = object.kind();
        self.bytes_allocated += size;

        let entry = HeapEntry {
            marked: false,
            size,
            object,
        };
        let r = match self.free_list.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(entry);
                GcRef { index }
            }
            None => {
                self.entries.push(Some(entry));
                GcRef::from_index(self.entries.len() - 1)
            }
        };

        if self.log {
            eprintln!("[GC] {} allocate {} bytes for {}", r, size, kind);
        }
        r
    }

    /// Look up the canonical string for `chars` without allocating.
    pub fn find_interned(&self, chars: &str) -> Option<GcRef> {
        self.strings.get(chars).copied()
    }

    /// Return the canonical string for `chars`, allocating it if absent.
    pub fn intern(&mut self, chars: &str) -> GcRef {
        match self.find_interned(chars) {
            Some(r) => r,
            None => self.insert_string(Rc::from(chars)),
        }
    }

    /// Like [`Heap::intern`], taking ownership of the buffer.
    pub fn intern_owned(&mut self, chars: String) -> GcRef {
        match self.find_interned(&chars) {
            Some(r) => r,
            None => self.insert_string(Rc::from(chars)),
        }
    }

    fn insert_string(&mut self, chars: Rc<str>) -> GcRef {
        let r = self.alloc(Object::String(LoxString {
            chars: Rc::clone(&chars),
        }));
        self.strings.insert(chars, r);
        r
    }

    pub fn get(&self, r: GcRef) -> Option<&Object> {
        self.entries.get(r.index()).and_then(|e| e.as_ref()).map(|e| &e.object)
    }

    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut Object> {
        self.entries
            .get_mut(r.index())
            .and_then(|e| e.as_mut())
            .map(|e| &mut e.object)
    }

    /// Whether `r` currently names a live object.
    pub fn contains(&self, r: GcRef) -> bool {
        self.get(r).is_some()
    }

    pub fn kind(&self, r: GcRef) -> ObjectType {
        self[r].kind()
    }

    /// Whether `value` is an object of the given type.
    pub fn is(&self, value: Value, kind: ObjectType) -> bool {
        match value {
            Value::Obj(r) => self.kind(r) == kind,
            _ => false,
        }
    }

    // =========================================================================
    // Typed accessors
    //
    // Callers only use these where the bytecode guarantees the type; a
    // mismatch means the heap or the compiler is broken.
    // =========================================================================

    pub fn string(&self, r: GcRef) -> &LoxString {
        match &self[r] {
            Object::String(s) => s,
            other => unreachable!("expected string, found {}", other.kind()),
        }
    }

    /// The characters of a string object.
    pub fn str(&self, r: GcRef) -> &str {
        &self.string(r).chars
    }

    pub fn function(&self, r: GcRef) -> &Function {
        match &self[r] {
            Object::Function(f) => f,
            other => unreachable!("expected function, found {}", other.kind()),
        }
    }

    pub fn closure(&self, r: GcRef) -> &Closure {
        match &self[r] {
            Object::Closure(c) => c,
            other => unreachable!("expected closure, found {}", other.kind()),
        }
    }

    pub fn upvalue(&self, r: GcRef) -> Upvalue {
        match &self[r] {
            Object::Upvalue(u) => *u,
            other => unreachable!("expected upvalue, found {}", other.kind()),
        }
    }

    pub fn upvalue_mut(&mut self, r: GcRef) -> &mut Upvalue {
        match &mut self[r] {
            Object::Upvalue(u) => u,
            other => unreachable!("expected upvalue, found {}", other.kind()),
        }
    }

    pub fn class(&self, r: GcRef) -> &Class {
        match &self[r] {
            Object::Class(c) => c,
            other => unreachable!("expected class, found {}", other.kind()),
        }
    }

    fn class_mut(&mut self, r: GcRef) -> &mut Class {
        match &mut self[r] {
            Object::Class(c) => c,
            other => unreachable!("expected class, found {}", other.kind()),
        }
    }

    pub fn instance(&self, r: GcRef) -> &Instance {
        match &self[r] {
            Object::Instance(i) => i,
            other => unreachable!("expected instance, found {}", other.kind()),
        }
    }

    fn instance_mut(&mut self, r: GcRef) -> &mut Instance {
        match &mut self[r] {
            Object::Instance(i) => i,
            other => unreachable!("expected instance, found {}", other.kind()),
        }
    }

    pub fn bound_method(&self, r: GcRef) -> &BoundMethod {
        match &self[r] {
            Object::BoundMethod(b) => b,
            other => unreachable!("expected bound method, found {}", other.kind()),
        }
    }

    pub fn native(&self, r: GcRef) -> &Native {
        match &self[r] {
            Object::Native(n) => n,
            other => unreachable!("expected native, found {}", other.kind()),
        }
    }

    // =========================================================================
    // Table growth
    //
    // Fields and methods added after allocation are charged to the owning
    // object, so sweep releases exactly what was counted.
    // =========================================================================

    /// Set a field on an instance.
    pub fn set_field(&mut self, instance: GcRef, name: GcRef, value: Value) {
        if self.instance_mut(instance).fields.insert(name, value).is_none() {
            self.charge(instance, TABLE_ENTRY_SIZE);
        }
    }

    /// Add or replace a method on a class.
    pub fn set_method(&mut self, class: GcRef, name: GcRef, method: Value) {
        if self.class_mut(class).methods.insert(name, method).is_none() {
            self.charge(class, TABLE_ENTRY_SIZE);
        }
    }

    /// Copy every method of `superclass` down into `subclass`.
    pub fn inherit_methods(&mut self, superclass: GcRef, subclass: GcRef) {
        let methods = self.class(superclass).methods.clone();
        let target = &mut self.class_mut(subclass).methods;
        let before = target.len();
        target.extend(methods);
        let added = target.len() - before;
        self.charge(subclass, added * TABLE_ENTRY_SIZE);
    }

    fn charge(&mut self, r: GcRef, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let Some(entry) = self.entries.get_mut(r.index()).and_then(|e| e.as_mut()) else {
            return;
        };
        entry.size += bytes;
        self.bytes_allocated += bytes;
        if self.log {
            eprintln!("[GC] {} grow {} bytes", r, bytes);
        }
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Perform a full garbage collection cycle.
    ///
    /// Everything not reachable from `roots` is freed.
    pub fn collect<I>(&mut self, roots: I)
    where
        I: IntoIterator<Item = GcRef>,
    {
        let before = self.bytes_allocated;
        if self.log {
            eprintln!("[GC] -- gc begin");
        }

        let mut gray = Vec::new();
        for r in roots {
            self.mark_object(r, &mut gray);
        }
        self.trace_references(&mut gray);
        self.sweep();

        self.next_gc = (self.bytes_allocated * self.grow_factor).max(self.initial_threshold);
        self.stats.collections += 1;

        if self.log {
            eprintln!(
                "[GC] -- gc end: collected {} bytes (from {} to {}) next at {}",
                before - self.bytes_allocated,
                before,
                self.bytes_allocated,
                self.next_gc
            );
        }
    }

    fn mark_object(&mut self, r: GcRef, gray: &mut Vec<GcRef>) {
        if let Some(Some(entry)) = self.entries.get_mut(r.index()) {
            if !entry.marked {
                entry.marked = true;
                gray.push(r);
            }
        }
    }

    /// Mark phase: blacken gray objects until the worklist is empty.
    fn trace_references(&mut self, gray: &mut Vec<GcRef>) {
        let mut children = Vec::new();
        while let Some(r) = gray.pop() {
            self[r].trace(&mut children);
            for child in children.drain(..) {
                self.mark_object(child, gray);
            }
        }
    }

    /// Sweep phase: free unmarked objects and clear marks on survivors.
    fn sweep(&mut self) {
        let entries = &self.entries;
        self.strings.retain(|_, r| {
            matches!(entries.get(r.index()), Some(Some(entry)) if entry.marked)
        });

        for (index, slot) in self.entries.iter_mut().enumerate() {
            let Some(entry) = slot else {
                continue;
            };
            if entry.marked {
                entry.marked = false;
                continue;
            }

            if self.log {
                eprintln!("[GC] #{} free {}", index, entry.object.kind());
            }
            self.bytes_allocated -= entry.size;
            self.stats.objects_freed += 1;
            self.stats.bytes_freed += entry.size;
            *slot = None;
            self.free_list.push(index as u32);
        }
    }

    /// Get count of live (allocated, not yet swept) objects.
    pub fn object_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    // =========================================================================
    // Formatting
    // =========================================================================

    /// Get the type name of a value, looking through object handles.
    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Obj(r) => self.kind(r).name(),
            other => other.type_name(),
        }
    }

    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(r) => self.format_object(r),
        }
    }

    fn format_object(&self, r: GcRef) -> String {
        match &self[r] {
            Object::String(s) => s.chars.to_string(),
            Object::Function(f) => self.format_function(f),
            Object::Closure(c) => self.format_function(self.function(c.function)),
            Object::Upvalue(_) => "upvalue".to_string(),
            Object::Class(c) => self.str(c.name).to_string(),
            Object::Instance(i) => format!("{} instance", self.str(self.class(i.class).name)),
            Object::BoundMethod(b) => self.format_object(b.method),
            Object::Native(_) => "<native fn>".to_string(),
        }
    }

    fn format_function(&self, function: &Function) -> String {
        match function.name {
            Some(name) => format!("<fn {}>", self.str(name)),
            None => "<script>".to_string(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<GcRef> for Heap {
    type Output = Object;

    fn index(&self, r: GcRef) -> &Object {
        match self.get(r) {
            Some(object) => object,
            None => panic!("dangling reference {}", r),
        }
    }
}

impl IndexMut<GcRef> for Heap {
    fn index_mut(&mut self, r: GcRef) -> &mut Object {
        match self.get_mut(r) {
            Some(object) => object,
            None => panic!("dangling reference {}", r),
        }
    }
}
