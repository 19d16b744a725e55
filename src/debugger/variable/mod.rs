//! Value model: typed proxies over in-process data.
//!
//! A value is a point-in-time view of a memory location or computed result,
//! identified by a symbolic expression. Values are produced on demand and are
//! never cached across resumes: the debuggee state token they carry expires
//! with the pause that produced them, and the expression is what a host
//! re-evaluates to get a fresh view.

use crate::debugger::channel::{FrameHandle, Primitive, RawValue, TypeId};
use crate::debugger::error::Error;
use crate::debugger::state::DebuggeeState;
use crate::debugger::types::{FieldInfo, Member, PropertyInfo};
use crate::debugger::Debugger;
use crate::muted_error;
use log::debug;
use std::rc::Rc;

pub mod expr;

pub use expr::Expr;

#[derive(Clone)]
pub struct Value {
    expr: Expr,
    raw: RawValue,
    state: Rc<DebuggeeState>,
    /// Back link to the object this value is a member of, used to re-resolve
    /// the member against a fresh view of the source. Non-owning in spirit:
    /// dropping the parent never touches the target process.
    parent: Option<Rc<Value>>,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("expr", &self.expr)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

impl Value {
    pub(crate) fn new(expr: Expr, raw: RawValue, state: Rc<DebuggeeState>) -> Self {
        Self {
            expr,
            raw,
            state,
            parent: None,
        }
    }

    fn member_of(mut self, parent: Rc<Value>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn raw(&self) -> &RawValue {
        &self.raw
    }

    pub fn parent(&self) -> Option<&Rc<Value>> {
        self.parent.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// True if the value is a class or value type (and not null).
    pub fn is_object(&self) -> bool {
        matches!(
            self.raw,
            RawValue::Object { .. } | RawValue::Struct { .. }
        )
    }

    pub fn primitive(&self) -> Option<&Primitive> {
        match &self.raw {
            RawValue::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// The value expires with the debuggee state it was produced under.
    pub fn has_expired(&self) -> bool {
        self.state.has_expired()
    }

    pub(crate) fn assert_valid(&self) -> Result<(), Error> {
        self.state.assert_valid()
    }
}

impl Debugger {
    /// Validate an instance-member target: it must be present, non-null, an
    /// object or struct, and an instance of the member's declaring type.
    /// Static members skip the check entirely (a null instance is fine).
    pub(crate) fn check_object(
        &self,
        target: Option<&Rc<Value>>,
        is_static: bool,
        declaring: TypeId,
    ) -> Result<(), Error> {
        if is_static {
            return Ok(());
        }
        let Some(target) = target else {
            return Err(Error::access("No target object specified"));
        };
        target.assert_valid()?;
        if target.is_null() {
            return Err(Error::access("Null reference"));
        }
        if !target.is_object() {
            return Err(Error::access("Target object is not class or value type"));
        }
        let runtime = target.raw.type_id().expect("object value carries a type");
        if !self.is_instance_of(runtime, declaring)? {
            let declaring = self.type_description(declaring)?;
            return Err(Error::access(format!(
                "Object is not of type {}",
                declaring.name
            )));
        }
        Ok(())
    }

    /// Get a field or property of an object with a given name. The runtime
    /// type chain is walked from derived to base, the first match wins.
    /// Returns `None` if no type in the chain defines the member.
    pub fn member_value(&self, target: &Rc<Value>, name: &str) -> Result<Option<Value>, Error> {
        target.assert_valid()?;
        let Some(runtime) = target.raw.type_id() else {
            return Ok(None);
        };
        match self.find_member(runtime, name)? {
            Some(Member::Field(field)) => Ok(Some(self.field_value(Some(target), &field)?)),
            Some(Member::Property(property)) => {
                Ok(Some(self.property_value(Some(target), &property, &[])?))
            }
            None => Ok(None),
        }
    }

    /// Get the value of a field. `target` may be `None` for a static field.
    pub fn field_value(
        &self,
        target: Option<&Rc<Value>>,
        field: &FieldInfo,
    ) -> Result<Value, Error> {
        self.check_object(target, field.is_static, field.declaring_type)?;

        // current frame is used to resolve context specific static values
        let frame_ctx = self.current_frame_context();

        let read = if field.is_static {
            self.channel()
                .read_static_field(field.declaring_type, field.token, frame_ctx)
        } else {
            let obj = target
                .and_then(|t| t.raw.object_handle())
                .expect("checked object target carries a handle");
            self.channel().read_field(obj, field.token)
        };
        let raw = match read {
            Ok(raw) => raw,
            Err(e) => {
                debug!(target: "debugger", "field `{}` read failed: {e:#}", field.name);
                return Err(Error::access("Can not get value of field"));
            }
        };

        let base = target.map(|t| t.expr.clone()).unwrap_or(Expr::Empty);
        let value = Value::new(base.field(&field.name), raw, self.debuggee.state().clone());
        Ok(match target {
            Some(parent) => value.member_of(parent.clone()),
            None => value,
        })
    }

    /// Write the value of a field.
    pub fn set_field_value(
        &self,
        target: Option<&Rc<Value>>,
        field: &FieldInfo,
        new_value: &RawValue,
    ) -> Result<(), Error> {
        self.check_object(target, field.is_static, field.declaring_type)?;

        let written = if field.is_static {
            self.channel()
                .write_static_field(field.declaring_type, field.token, new_value)
        } else {
            let obj = target
                .and_then(|t| t.raw.object_handle())
                .expect("checked object target carries a handle");
            self.channel().write_field(obj, field.token, new_value)
        };
        written.map_err(|e| {
            debug!(target: "debugger", "field `{}` write failed: {e:#}", field.name);
            Error::access("Can not set value of field")
        })
    }

    /// Get the value of a property using the get accessor.
    pub fn property_value(
        &self,
        target: Option<&Rc<Value>>,
        property: &PropertyInfo,
        args: &[Value],
    ) -> Result<Value, Error> {
        self.check_object(target, property.is_static, property.declaring_type)?;

        let Some(getter) = property.getter else {
            return Err(Error::access("Property does not have a get method"));
        };

        let raw = self.invoke_accessor(target, property, getter, args)?;

        let base = target.map(|t| t.expr.clone()).unwrap_or(Expr::Empty);
        let value = Value::new(
            base.property(&property.name),
            raw,
            self.debuggee.state().clone(),
        );
        Ok(match target {
            Some(parent) => value.member_of(parent.clone()),
            None => value,
        })
    }

    /// Set the value of a property using the set accessor. Invocation
    /// argument order is: target (for instance properties), new value, then
    /// any index arguments.
    pub fn set_property_value(
        &self,
        target: Option<&Rc<Value>>,
        property: &PropertyInfo,
        args: &[Value],
        new_value: Value,
    ) -> Result<(), Error> {
        self.check_object(target, property.is_static, property.declaring_type)?;

        let Some(setter) = property.setter else {
            return Err(Error::access("Property does not have a set method"));
        };

        let mut all_params = Vec::with_capacity(1 + args.len());
        all_params.push(new_value);
        all_params.extend(args.iter().cloned());

        self.invoke_accessor(target, property, setter, &all_params)?;
        Ok(())
    }

    /// Frame handle used to resolve context-specific statics: the selected
    /// thread's selected frame, or its most recent frame, while paused.
    pub(crate) fn current_frame_context(&self) -> Option<FrameHandle> {
        if !self.debuggee.is_paused() {
            return None;
        }
        let thread = self.debuggee.threads.selected()?;
        if let Some(frame) = thread.selected_frame() {
            return Some(frame.handle());
        }
        let frame = muted_error!(thread.most_recent_frame(&self.debuggee))??;
        Some(frame.handle())
    }
}
