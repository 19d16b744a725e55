//! Explicit type-descriptor model. Member lookup never relies on host
//! reflection: the channel delivers a [`TypeDescription`] per runtime type and
//! inheritance walks happen here, over those descriptions.

use crate::debugger::channel::{ControlChannel, FieldToken, MethodToken, TypeId};
use crate::debugger::error::Error;
use crate::debugger::Debugger;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub token: FieldToken,
    pub is_static: bool,
    pub declaring_type: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: String,
    pub getter: Option<MethodToken>,
    pub setter: Option<MethodToken>,
    pub is_static: bool,
    pub declaring_type: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub token: MethodToken,
    pub is_static: bool,
    pub is_virtual: bool,
    pub declaring_type: TypeId,
}

/// Description of a single runtime type: its own members and a link to the base type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescription {
    pub id: TypeId,
    pub name: String,
    pub base: Option<TypeId>,
    pub fields: Vec<FieldInfo>,
    pub properties: Vec<PropertyInfo>,
    pub methods: Vec<MethodInfo>,
}

impl TypeDescription {
    /// Find a field declared directly on this type (base types are not searched).
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a property declared directly on this type.
    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find a method declared directly on this type.
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A field or property found by a member lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Field(FieldInfo),
    Property(PropertyInfo),
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Field(f) => &f.name,
            Member::Property(p) => &p.name,
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            Member::Field(f) => f.is_static,
            Member::Property(p) => p.is_static,
        }
    }

    pub fn declaring_type(&self) -> TypeId {
        match self {
            Member::Field(f) => f.declaring_type,
            Member::Property(p) => p.declaring_type,
        }
    }
}

/// Per-debugger cache of type descriptions fetched from the channel.
#[derive(Default)]
pub(crate) struct TypeCache {
    types: RefCell<HashMap<TypeId, Rc<TypeDescription>>>,
}

impl TypeCache {
    pub(crate) fn get(
        &self,
        channel: &dyn ControlChannel,
        ty: TypeId,
    ) -> Result<Rc<TypeDescription>, Error> {
        if let Some(known) = self.types.borrow().get(&ty) {
            return Ok(known.clone());
        }
        let description = Rc::new(channel.describe_type(ty)?);
        self.types
            .borrow_mut()
            .insert(ty, description.clone());
        Ok(description)
    }
}

impl Debugger {
    pub(crate) fn type_description(&self, ty: TypeId) -> Result<Rc<TypeDescription>, Error> {
        self.type_cache.get(self.channel(), ty)
    }

    /// True if `runtime` equals `declaring` or inherits from it.
    pub(crate) fn is_instance_of(&self, runtime: TypeId, declaring: TypeId) -> Result<bool, Error> {
        let mut current = Some(runtime);
        while let Some(ty) = current {
            if ty == declaring {
                return Ok(true);
            }
            current = self.type_description(ty)?.base;
        }
        Ok(false)
    }

    /// Walk the type chain from `ty` outward through base types until a field
    /// or property with the given name is found. The first match wins, so a
    /// derived member shadows a base member of the same name.
    pub(crate) fn find_member(&self, ty: TypeId, name: &str) -> Result<Option<Member>, Error> {
        let mut current = Some(ty);
        while let Some(ty) = current {
            let description = self.type_description(ty)?;
            if let Some(field) = description.field(name) {
                return Ok(Some(Member::Field(field.clone())));
            }
            if let Some(property) = description.property(name) {
                return Ok(Some(Member::Property(property.clone())));
            }
            current = description.base;
        }
        Ok(None)
    }

    /// Find a method by name, derived to base.
    pub(crate) fn find_method(&self, ty: TypeId, name: &str) -> Result<Option<MethodInfo>, Error> {
        let mut current = Some(ty);
        while let Some(ty) = current {
            let description = self.type_description(ty)?;
            if let Some(method) = description.method(name) {
                return Ok(Some(method.clone()));
            }
            current = description.base;
        }
        Ok(None)
    }

    /// Virtual dispatch: for a virtual method resolve the most derived
    /// override starting from the target's runtime type. Non-virtual methods
    /// are returned as is.
    pub(crate) fn resolve_virtual(
        &self,
        runtime: TypeId,
        method: &MethodInfo,
    ) -> Result<MethodInfo, Error> {
        if !method.is_virtual {
            return Ok(method.clone());
        }
        Ok(self
            .find_method(runtime, &method.name)?
            .unwrap_or_else(|| method.clone()))
    }
}
