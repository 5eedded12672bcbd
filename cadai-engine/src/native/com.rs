//! 通过 COM 后期绑定（`IDispatch`）驱动正在运行的 AutoCAD。

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr;

use cadai_core::entity::{EntityHandle, EntityRecord};
use cadai_core::geometry::{Point3, Vector3};
use cadai_core::variable::VariableValue;
use tracing::debug;
use windows::Win32::System::Com::{
    CLSIDFromProgID, COINIT_APARTMENTTHREADED, CoInitializeEx, DISPATCH_FLAGS, DISPATCH_METHOD,
    DISPATCH_PROPERTYGET, DISPPARAMS, IDispatch, SAFEARRAY,
};
use windows::Win32::System::Ole::{
    GetActiveObject, SafeArrayAccessData, SafeArrayCreateVector, SafeArrayGetLBound,
    SafeArrayGetUBound, SafeArrayUnaccessData,
};
use windows::Win32::System::Variant::{
    VARENUM, VARIANT, VT_ARRAY, VT_BOOL, VT_BSTR, VT_DISPATCH, VT_EMPTY, VT_I2, VT_I4, VT_NULL,
    VT_R4, VT_R8, VT_TYPEMASK, VT_UI1, VT_VARIANT, VariantClear,
};
use windows::core::{BSTR, GUID, IUnknown, Interface, PCWSTR};

use super::{EntityProperties, read_entity};
use crate::errors::AutomationError;
use crate::session::{CadSession, Connector};

const LOCALE_USER_DEFAULT: u32 = 0x0400;

fn call_failed(operation: &'static str, err: impl std::fmt::Display) -> AutomationError {
    AutomationError::CallFailed {
        operation,
        reason: err.to_string(),
    }
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// 调用参数。
enum Arg {
    Real(f64),
    Int(i32),
    Text(String),
    Reals(Vec<f64>),
}

/// 调用返回值。
enum ComValue {
    Empty,
    Integer(i64),
    Real(f64),
    Text(String),
    Reals(Vec<f64>),
    Object(IDispatch),
}

impl ComValue {
    fn into_object(self, operation: &'static str) -> Result<IDispatch, AutomationError> {
        match self {
            ComValue::Object(object) => Ok(object),
            _ => Err(call_failed(operation, "expected an automation object")),
        }
    }
}

/// 按调用顺序构造的参数数组，析构时释放其中的 BSTR 与 SAFEARRAY。
struct VariantArgs(Vec<VARIANT>);

impl Drop for VariantArgs {
    fn drop(&mut self) {
        for value in &mut self.0 {
            unsafe {
                let _ = VariantClear(value);
            }
        }
    }
}

unsafe fn new_variant(vt: VARENUM) -> VARIANT {
    let mut value: VARIANT = unsafe { std::mem::zeroed() };
    unsafe {
        (*value.Anonymous.Anonymous).vt = vt;
    }
    value
}

unsafe fn real_array(values: &[f64]) -> Result<*mut SAFEARRAY, AutomationError> {
    let array = unsafe { SafeArrayCreateVector(VT_R8, 0, values.len() as u32) };
    if array.is_null() {
        return Err(call_failed("SafeArrayCreateVector", "allocation failed"));
    }
    let mut data: *mut c_void = ptr::null_mut();
    unsafe {
        SafeArrayAccessData(array, &mut data).map_err(|e| call_failed("SafeArrayAccessData", e))?;
        ptr::copy_nonoverlapping(values.as_ptr(), data.cast::<f64>(), values.len());
        SafeArrayUnaccessData(array).map_err(|e| call_failed("SafeArrayUnaccessData", e))?;
    }
    Ok(array)
}

fn to_variant(arg: &Arg) -> Result<VARIANT, AutomationError> {
    unsafe {
        let value = match arg {
            Arg::Real(real) => {
                let mut value = new_variant(VT_R8);
                (*value.Anonymous.Anonymous).Anonymous.dblVal = *real;
                value
            }
            Arg::Int(int) => {
                let mut value = new_variant(VT_I4);
                (*value.Anonymous.Anonymous).Anonymous.lVal = *int;
                value
            }
            Arg::Text(text) => {
                let mut value = new_variant(VT_BSTR);
                (*value.Anonymous.Anonymous).Anonymous.bstrVal =
                    ManuallyDrop::new(BSTR::from(text.as_str()));
                value
            }
            Arg::Reals(values) => {
                let array = real_array(values)?;
                let mut value = new_variant(VARENUM(VT_ARRAY.0 | VT_R8.0));
                (*value.Anonymous.Anonymous).Anonymous.parray = array;
                value
            }
        };
        Ok(value)
    }
}

unsafe fn read_real_array(array: *mut SAFEARRAY, base: VARENUM) -> Option<Vec<f64>> {
    if array.is_null() {
        return None;
    }
    unsafe {
        let lower = SafeArrayGetLBound(array, 1).ok()?;
        let upper = SafeArrayGetUBound(array, 1).ok()?;
        let len = usize::try_from(upper - lower + 1).unwrap_or(0);
        let mut data: *mut c_void = ptr::null_mut();
        SafeArrayAccessData(array, &mut data).ok()?;
        let values = if base == VT_R8 {
            Some(std::slice::from_raw_parts(data.cast::<f64>(), len).to_vec())
        } else if base == VT_VARIANT {
            std::slice::from_raw_parts(data.cast::<VARIANT>(), len)
                .iter()
                .map(|item| {
                    let inner = &*item.Anonymous.Anonymous;
                    match inner.vt {
                        VT_R8 => Some(inner.Anonymous.dblVal),
                        VT_R4 => Some(f64::from(inner.Anonymous.fltVal)),
                        VT_I4 => Some(f64::from(inner.Anonymous.lVal)),
                        VT_I2 => Some(f64::from(inner.Anonymous.iVal)),
                        _ => None,
                    }
                })
                .collect()
        } else {
            None
        };
        let _ = SafeArrayUnaccessData(array);
        values
    }
}

fn from_variant(value: &VARIANT) -> Result<ComValue, AutomationError> {
    unsafe {
        let inner = &*value.Anonymous.Anonymous;
        let vt = inner.vt;
        if vt.0 & VT_ARRAY.0 != 0 {
            let base = VARENUM(vt.0 & VT_TYPEMASK.0);
            return read_real_array(inner.Anonymous.parray, base)
                .map(ComValue::Reals)
                .ok_or_else(|| call_failed("VARIANT", format!("unsupported array type {}", vt.0)));
        }
        let converted = match vt {
            VT_EMPTY | VT_NULL => ComValue::Empty,
            VT_I2 => ComValue::Integer(i64::from(inner.Anonymous.iVal)),
            VT_I4 => ComValue::Integer(i64::from(inner.Anonymous.lVal)),
            VT_UI1 => ComValue::Integer(i64::from(inner.Anonymous.bVal)),
            VT_BOOL => ComValue::Integer(i64::from(inner.Anonymous.boolVal.0 != 0)),
            VT_R4 => ComValue::Real(f64::from(inner.Anonymous.fltVal)),
            VT_R8 => ComValue::Real(inner.Anonymous.dblVal),
            VT_BSTR => ComValue::Text((*inner.Anonymous.bstrVal).to_string()),
            VT_DISPATCH => match (*inner.Anonymous.pdispVal).clone() {
                Some(object) => ComValue::Object(object),
                None => ComValue::Empty,
            },
            other => {
                return Err(call_failed("VARIANT", format!("unsupported type {}", other.0)));
            }
        };
        Ok(converted)
    }
}

/// `IDispatch` 的按名调用封装。
#[derive(Clone)]
struct Dispatch(IDispatch);

impl Dispatch {
    fn dispid(&self, name: &str) -> windows::core::Result<i32> {
        let name = wide(name);
        let names = [PCWSTR(name.as_ptr())];
        let mut id = 0i32;
        unsafe {
            self.0
                .GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, LOCALE_USER_DEFAULT, &mut id)?;
        }
        Ok(id)
    }

    fn invoke(
        &self,
        operation: &'static str,
        name: &str,
        flags: DISPATCH_FLAGS,
        args: &[Arg],
    ) -> Result<ComValue, AutomationError> {
        let id = self.dispid(name).map_err(|e| call_failed(operation, e))?;
        // IDispatch 约定参数逆序传递。
        let mut variants = VariantArgs(
            args.iter()
                .rev()
                .map(to_variant)
                .collect::<Result<Vec<_>, _>>()?,
        );
        let params = DISPPARAMS {
            rgvarg: variants.0.as_mut_ptr(),
            rgdispidNamedArgs: ptr::null_mut(),
            cArgs: variants.0.len() as u32,
            cNamedArgs: 0,
        };
        let mut result: VARIANT = unsafe { std::mem::zeroed() };
        unsafe {
            self.0
                .Invoke(
                    id,
                    &GUID::zeroed(),
                    LOCALE_USER_DEFAULT,
                    flags,
                    &params,
                    Some(&mut result as *mut VARIANT),
                    None,
                    None,
                )
                .map_err(|e| call_failed(operation, e))?;
        }
        let converted = from_variant(&result);
        unsafe {
            let _ = VariantClear(&mut result);
        }
        converted
    }

    fn get(&self, operation: &'static str, name: &str) -> Result<ComValue, AutomationError> {
        self.invoke(operation, name, DISPATCH_PROPERTYGET, &[])
    }

    fn call(
        &self,
        operation: &'static str,
        name: &str,
        args: &[Arg],
    ) -> Result<ComValue, AutomationError> {
        self.invoke(operation, name, DISPATCH_METHOD, args)
    }

    fn handle_of(&self, operation: &'static str) -> Result<EntityHandle, AutomationError> {
        match self.get(operation, "Handle")? {
            ComValue::Text(handle) => Ok(EntityHandle::new(handle)),
            _ => Err(call_failed(operation, "entity has no handle")),
        }
    }
}

/// 以实体对象的 ActiveX 属性作为属性来源。
struct ComEntity<'a>(&'a Dispatch);

impl EntityProperties for ComEntity<'_> {
    fn text(&self, name: &str) -> Option<String> {
        match self.0.get("GetProperty", name).ok()? {
            ComValue::Text(text) => Some(text),
            _ => None,
        }
    }

    fn real(&self, name: &str) -> Option<f64> {
        match self.0.get("GetProperty", name).ok()? {
            ComValue::Real(value) => Some(value),
            ComValue::Integer(value) => Some(value as f64),
            _ => None,
        }
    }

    fn integer(&self, name: &str) -> Option<i64> {
        match self.0.get("GetProperty", name).ok()? {
            ComValue::Integer(value) => Some(value),
            _ => None,
        }
    }

    fn reals(&self, name: &str) -> Option<Vec<f64>> {
        match self.0.get("GetProperty", name).ok()? {
            ComValue::Reals(values) => Some(values),
            _ => None,
        }
    }
}

/// 已附加的 AutoCAD 会话：活动文档及其模型空间。
pub struct ComSession {
    document: Dispatch,
    model_space: Dispatch,
}

impl ComSession {
    fn add(
        &self,
        operation: &'static str,
        method: &str,
        args: &[Arg],
    ) -> Result<EntityHandle, AutomationError> {
        let entity = self
            .model_space
            .call(operation, method, args)?
            .into_object(operation)?;
        Dispatch(entity).handle_of(operation)
    }
}

fn point_arg(point: Point3) -> Arg {
    Arg::Reals(point.to_array().to_vec())
}

impl CadSession for ComSession {
    fn add_line(&mut self, start: Point3, end: Point3) -> Result<EntityHandle, AutomationError> {
        self.add("AddLine", "AddLine", &[point_arg(start), point_arg(end)])
    }

    fn add_circle(&mut self, center: Point3, radius: f64) -> Result<EntityHandle, AutomationError> {
        self.add("AddCircle", "AddCircle", &[point_arg(center), Arg::Real(radius)])
    }

    fn add_point(&mut self, point: Point3) -> Result<EntityHandle, AutomationError> {
        self.add("AddPoint", "AddPoint", &[point_arg(point)])
    }

    fn add_arc(
        &mut self,
        center: Point3,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> Result<EntityHandle, AutomationError> {
        self.add(
            "AddArc",
            "AddArc",
            &[
                point_arg(center),
                Arg::Real(radius),
                Arg::Real(start_angle),
                Arg::Real(end_angle),
            ],
        )
    }

    fn add_spline(
        &mut self,
        fit_points: &[f64],
        start_tangent: Vector3,
        end_tangent: Vector3,
    ) -> Result<EntityHandle, AutomationError> {
        self.add(
            "AddSpline",
            "AddSpline",
            &[
                Arg::Reals(fit_points.to_vec()),
                Arg::Reals(start_tangent.to_array().to_vec()),
                Arg::Reals(end_tangent.to_array().to_vec()),
            ],
        )
    }

    fn send_command(&mut self, command: &str) -> Result<(), AutomationError> {
        self.document
            .call("SendCommand", "SendCommand", &[Arg::Text(command.to_string())])
            .map(|_| ())
    }

    fn model_space(&self) -> Result<Vec<Result<EntityRecord, AutomationError>>, AutomationError> {
        let count = match self.model_space.get("ModelSpace.Count", "Count")? {
            ComValue::Integer(count) => count,
            _ => return Err(call_failed("ModelSpace.Count", "not an integer")),
        };
        debug!(count, "遍历模型空间");
        let items = (0..count)
            .map(|index| {
                let index = i32::try_from(index).map_err(|e| call_failed("ModelSpace.Item", e))?;
                let entity = Dispatch(
                    self.model_space
                        .invoke(
                            "ModelSpace.Item",
                            "Item",
                            DISPATCH_FLAGS(DISPATCH_METHOD.0 | DISPATCH_PROPERTYGET.0),
                            &[Arg::Int(index)],
                        )?
                        .into_object("ModelSpace.Item")?,
                );
                read_entity(&ComEntity(&entity))
            })
            .collect();
        Ok(items)
    }

    fn get_variable(&self, name: &str) -> Result<VariableValue, AutomationError> {
        let value = self
            .document
            .call("GetVariable", "GetVariable", &[Arg::Text(name.to_string())])?;
        match value {
            ComValue::Integer(value) => Ok(VariableValue::Integer(value)),
            ComValue::Real(value) => Ok(VariableValue::Real(value)),
            ComValue::Text(value) => Ok(VariableValue::Text(value)),
            ComValue::Reals(values) => Ok(VariableValue::Point(values)),
            ComValue::Empty | ComValue::Object(_) => {
                Err(AutomationError::UnknownVariable(name.to_string()))
            }
        }
    }
}

/// 通过 `GetActiveObject` 附加到已注册的运行实例。
#[derive(Debug, Default, Clone, Copy)]
pub struct ComConnector;

impl ComConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for ComConnector {
    fn attach(&self, prog_id: &str) -> Result<Box<dyn CadSession>, AutomationError> {
        let attach_failed = |reason: String| AutomationError::AttachFailed {
            prog_id: prog_id.to_string(),
            reason,
        };
        unsafe {
            // 已初始化（包括以其他并发模型初始化）时忽略返回值。
            let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        }

        let name = wide(prog_id);
        let clsid = unsafe { CLSIDFromProgID(PCWSTR(name.as_ptr())) }
            .map_err(|e| attach_failed(e.to_string()))?;
        let mut unknown: Option<IUnknown> = None;
        unsafe { GetActiveObject(&clsid, ptr::null_mut(), &mut unknown) }
            .map_err(|e| attach_failed(e.to_string()))?;
        let application = unknown
            .ok_or_else(|| attach_failed("no running instance".to_string()))?
            .cast::<IDispatch>()
            .map_err(|e| attach_failed(e.to_string()))?;

        let application = Dispatch(application);
        let document = Dispatch(
            application
                .get("ActiveDocument", "ActiveDocument")
                .and_then(|value| value.into_object("ActiveDocument"))
                .map_err(|e| attach_failed(e.to_string()))?,
        );
        let model_space = Dispatch(
            document
                .get("ModelSpace", "ModelSpace")
                .and_then(|value| value.into_object("ModelSpace"))
                .map_err(|e| attach_failed(e.to_string()))?,
        );
        Ok(Box::new(ComSession {
            document,
            model_space,
        }))
    }
}
