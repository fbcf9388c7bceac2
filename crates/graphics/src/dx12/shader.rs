use std::ffi::CString;

use log::debug;
use windows::{
    core::{s, HSTRING, PCSTR},
    Win32::Graphics::Direct3D::{
        Fxc::{D3DCompileFromFile, D3DCOMPILE_DEBUG, D3DCOMPILE_SKIP_OPTIMIZATION},
        ID3DBlob,
    },
};

use crate::{
    backend::{ShaderBytecode, ShaderCompiler, ShaderSource, ShaderStage},
    Error, Result,
};

/// Compiles HLSL with FXC when a pipeline is created.
pub struct FxcCompiler {
    debug: bool,
}

impl FxcCompiler {
    #[must_use]
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl ShaderCompiler for FxcCompiler {
    fn compile(&self, source: &ShaderSource) -> Result<ShaderBytecode> {
        let path = source.path.display().to_string();
        let compile_error = |message: String| Error::ShaderCompilation {
            path: path.clone(),
            message,
        };

        let entry_point = CString::new(source.entry_point)
            .map_err(|_| compile_error("entry point contains a nul byte".to_owned()))?;

        let target = match source.stage {
            ShaderStage::Vertex => s!("vs_5_1"),
            ShaderStage::Pixel => s!("ps_5_1"),
        };

        let flags = if self.debug {
            D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
        } else {
            0
        };

        let mut code: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;

        let result = unsafe {
            D3DCompileFromFile(
                &HSTRING::from(source.path.as_os_str()),
                None,
                None,
                PCSTR(entry_point.as_ptr().cast()),
                target,
                flags,
                0,
                &mut code,
                Some(&mut errors),
            )
        };

        if let Err(e) = result {
            let message = errors.as_ref().map_or_else(|| e.to_string(), blob_text);
            return Err(compile_error(message));
        }

        let code = code.ok_or_else(|| compile_error("no bytecode produced".to_owned()))?;
        let bytes = unsafe {
            std::slice::from_raw_parts(code.GetBufferPointer().cast::<u8>(), code.GetBufferSize())
        };

        debug!(
            "compiled `{}` from {path} ({} bytes)",
            source.entry_point,
            bytes.len()
        );

        Ok(ShaderBytecode(bytes.to_vec()))
    }
}

fn blob_text(blob: &ID3DBlob) -> String {
    let text = unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize())
    };
    String::from_utf8_lossy(text).trim_end_matches('\0').trim().to_owned()
}
